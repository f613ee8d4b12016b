//! Best-effort position cache.
//!
//! Holdings are replaced wholesale on each successful refresh and
//! retained on failure; position data feeds gating logic, not the core
//! stream, so a failed refresh is logged and swallowed. Callers pace
//! refreshes; this component does not deduplicate overlapping ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use pm_core::PositionSide;

use crate::gateway::TradingGateway;

#[derive(Debug, Default)]
struct Inner {
    sides: RwLock<Vec<PositionSide>>,
    refreshing: AtomicBool,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
}

/// Shared, clone-able cache of current holdings per outcome.
#[derive(Debug, Clone, Default)]
pub struct PositionCache {
    inner: Arc<Inner>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot of all sides.
    pub fn snapshot(&self) -> Vec<PositionSide> {
        self.inner.sides.read().expect("positions lock poisoned").clone()
    }

    /// Holdings for one outcome, if present in the last snapshot.
    pub fn side(&self, outcome: &str) -> Option<PositionSide> {
        self.inner
            .sides
            .read()
            .expect("positions lock poisoned")
            .iter()
            .find(|s| s.outcome == outcome)
            .cloned()
    }

    /// True while a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    /// When the cache last refreshed successfully.
    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .last_refreshed
            .read()
            .expect("positions lock poisoned")
    }

    /// Refresh from the gateway; replace on success, retain on failure.
    pub async fn refresh<G: TradingGateway + ?Sized>(
        &self,
        gateway: &G,
        condition_id: &str,
        outcomes: &[String],
    ) {
        self.inner.refreshing.store(true, Ordering::Release);

        match gateway.fetch_positions(condition_id, outcomes).await {
            Ok(sides) => {
                debug!(sides = sides.len(), "position snapshot replaced");
                *self.inner.sides.write().expect("positions lock poisoned") = sides;
                *self
                    .inner
                    .last_refreshed
                    .write()
                    .expect("positions lock poisoned") = Some(Utc::now());
            }
            Err(e) => {
                warn!("position refresh failed, keeping previous snapshot: {e}");
            }
        }

        self.inner.refreshing.store(false, Ordering::Release);
    }

    /// Fire-and-forget refresh on a spawned task.
    pub fn spawn_refresh<G: TradingGateway>(
        &self,
        gateway: Arc<G>,
        condition_id: String,
        outcomes: Vec<String>,
    ) {
        let cache = self.clone();
        tokio::spawn(async move {
            cache.refresh(gateway.as_ref(), &condition_id, &outcomes).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, MarketConstraints, OrderAck, OrderRequest};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FlakyGateway {
        responses: Mutex<Vec<Result<Vec<PositionSide>, GatewayError>>>,
    }

    #[async_trait]
    impl TradingGateway for FlakyGateway {
        async fn submit_order(&self, _: &OrderRequest) -> Result<OrderAck, GatewayError> {
            unimplemented!("not used in position tests")
        }

        async fn fetch_positions(
            &self,
            _condition_id: &str,
            _outcomes: &[String],
        ) -> Result<Vec<PositionSide>, GatewayError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .expect("no scripted response left")
        }

        async fn market_constraints(
            &self,
            _: &str,
        ) -> Result<MarketConstraints, GatewayError> {
            unimplemented!("not used in position tests")
        }
    }

    fn side(outcome: &str, size: rust_decimal::Decimal) -> PositionSide {
        PositionSide {
            outcome: outcome.to_string(),
            size,
            avg_price: Some(dec!(0.40)),
            cur_price: None,
            initial_value: None,
        }
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let gateway = FlakyGateway {
            responses: Mutex::new(vec![
                Ok(vec![side("Celtics", dec!(5))]),
                Ok(vec![side("Lakers", dec!(100)), side("Celtics", dec!(0))]),
            ]),
        };
        let cache = PositionCache::new();

        cache.refresh(&gateway, "cond1", &[]).await;
        assert_eq!(cache.snapshot().len(), 2);
        assert_eq!(cache.side("Lakers").unwrap().size, dec!(100));

        // second refresh replaces, never merges
        cache.refresh(&gateway, "cond1", &[]).await;
        assert_eq!(cache.snapshot().len(), 1);
        assert!(cache.side("Lakers").is_none());
        assert_eq!(cache.side("Celtics").unwrap().size, dec!(5));
    }

    #[tokio::test]
    async fn test_failed_refresh_retains_previous() {
        let gateway = FlakyGateway {
            responses: Mutex::new(vec![
                Err(GatewayError::Transport("boom".to_string())),
                Ok(vec![side("Lakers", dec!(42))]),
            ]),
        };
        let cache = PositionCache::new();

        cache.refresh(&gateway, "cond1", &[]).await;
        assert_eq!(cache.side("Lakers").unwrap().size, dec!(42));
        let refreshed_at = cache.last_refreshed();

        cache.refresh(&gateway, "cond1", &[]).await;
        assert_eq!(cache.side("Lakers").unwrap().size, dec!(42));
        assert_eq!(cache.last_refreshed(), refreshed_at);
        assert!(!cache.is_refreshing());
    }
}
