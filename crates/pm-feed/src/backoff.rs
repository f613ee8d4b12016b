//! Reconnect backoff policy.
//!
//! A pure function of the retry counter so the schedule is testable
//! without timers: `delay = min(base * 2^retry_count, max)`.

use std::time::Duration;

/// Exponential backoff with a delay cap and a retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Retries allowed before the session goes terminal.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_retries: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before retry number `retry_count + 1`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        // 2^20 * 1s already dwarfs any sane cap; clamping the exponent
        // keeps the shift from overflowing.
        let factor = 1u32 << retry_count.min(20);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// True once `retry_count` consecutive failures have exhausted the
    /// retry budget.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30000),
            max_retries: 10,
        };

        let delays: Vec<u64> = (0..6).map(|n| policy.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000]);
    }

    #[test]
    fn test_delay_monotonically_nondecreasing() {
        let policy = BackoffPolicy::default();
        let mut prev = Duration::ZERO;
        for n in 0..40 {
            let d = policy.delay(n);
            assert!(d >= prev, "delay regressed at retry {n}");
            prev = d;
        }
    }

    #[test]
    fn test_delay_capped_for_huge_counters() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1000), policy.max);
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = BackoffPolicy::default();
        assert!(!policy.exhausted(0));
        assert!(!policy.exhausted(9));
        assert!(policy.exhausted(10));
        assert!(policy.exhausted(11));
    }
}
