//! Pre-submission eligibility checks.
//!
//! `OrderGate::check` runs immediately before any order submission,
//! short-circuiting on the first failure: single-flight, operator
//! authentication, signing credential and routing address, then the
//! rule-specific numeric preconditions. It is pure and side-effect free,
//! so callers may run it speculatively on every price tick; acquiring
//! the single-flight slot is a separate, explicit step.
//!
//! Rejections are expected steady-state outcomes ("cooldown active"),
//! never alarms; they are logged at debug level at most.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Operator credentials, loaded from the environment at startup.
///
/// Never read from the config file.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Bearer token authenticating the operator against the gateway.
    pub api_token: Option<String>,
    /// Signing credential for order placement.
    pub signer_key: Option<String>,
    /// Routing/proxy address the venue settles against.
    pub proxy_address: Option<String>,
}

impl Credentials {
    /// Read `PM_API_TOKEN`, `PM_SIGNER_KEY`, and `PM_PROXY_ADDRESS`.
    pub fn from_env() -> Self {
        fn non_empty(var: &str) -> Option<String> {
            std::env::var(var).ok().filter(|v| !v.trim().is_empty())
        }

        Self {
            api_token: non_empty("PM_API_TOKEN"),
            signer_key: non_empty("PM_SIGNER_KEY"),
            proxy_address: non_empty("PM_PROXY_ADDRESS"),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_token.is_some()
    }
}

/// Why a submission attempt was not allowed to proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateRejection {
    /// An order for this rule group is still outstanding.
    InFlight,
    /// No operator bearer token.
    NotAuthenticated,
    /// No signing credential configured.
    MissingSignerKey,
    /// No routing/proxy address configured.
    MissingProxyAddress,
    /// Budget behind the order is zero or negative.
    NonPositiveBudget,
    /// Price must sit strictly inside (0, 1).
    PriceOutOfRange,
    /// The rule's cooldown has not elapsed.
    CooldownActive,
    /// Cumulative spend has reached the configured cap.
    BudgetExhausted,
}

impl GateRejection {
    /// Short code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            GateRejection::InFlight => "IN_FLIGHT",
            GateRejection::NotAuthenticated => "NO_AUTH",
            GateRejection::MissingSignerKey => "NO_SIGNER",
            GateRejection::MissingProxyAddress => "NO_PROXY",
            GateRejection::NonPositiveBudget => "BAD_BUDGET",
            GateRejection::PriceOutOfRange => "BAD_PRICE",
            GateRejection::CooldownActive => "COOLDOWN",
            GateRejection::BudgetExhausted => "CAP",
        }
    }
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRejection::InFlight => write!(f, "an order is already in flight for this rule"),
            GateRejection::NotAuthenticated => write!(f, "operator is not authenticated"),
            GateRejection::MissingSignerKey => write!(f, "signing credential is not configured"),
            GateRejection::MissingProxyAddress => {
                write!(f, "routing/proxy address is not configured")
            }
            GateRejection::NonPositiveBudget => write!(f, "order budget must be positive"),
            GateRejection::PriceOutOfRange => {
                write!(f, "price must be strictly between 0 and 1")
            }
            GateRejection::CooldownActive => write!(f, "cooldown has not elapsed"),
            GateRejection::BudgetExhausted => write!(f, "cumulative budget cap reached"),
        }
    }
}

/// Facts about a candidate order, computed by the rule engine.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    /// Budget backing the order (buy cost or sell notional).
    pub budget: Decimal,
    /// Limit price of the order.
    pub price: Decimal,
    /// Whether the rule's cooldown has elapsed.
    pub cooldown_ok: bool,
    /// Whether cumulative spend stays under any configured cap.
    pub cap_ok: bool,
}

/// Eligibility gate, shared by all rule groups.
#[derive(Debug, Clone)]
pub struct OrderGate {
    credentials: Credentials,
}

impl OrderGate {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Run all checks in order, returning the first failure.
    pub fn check(&self, in_flight: &InFlightFlag, intent: &OrderIntent) -> Result<(), GateRejection> {
        if in_flight.is_held() {
            return Err(GateRejection::InFlight);
        }
        if !self.credentials.is_authenticated() {
            return Err(GateRejection::NotAuthenticated);
        }
        if self.credentials.signer_key.is_none() {
            return Err(GateRejection::MissingSignerKey);
        }
        if self.credentials.proxy_address.is_none() {
            return Err(GateRejection::MissingProxyAddress);
        }
        if intent.budget <= Decimal::ZERO {
            return Err(GateRejection::NonPositiveBudget);
        }
        if intent.price <= Decimal::ZERO || intent.price >= Decimal::ONE {
            return Err(GateRejection::PriceOutOfRange);
        }
        if !intent.cooldown_ok {
            return Err(GateRejection::CooldownActive);
        }
        if !intent.cap_ok {
            return Err(GateRejection::BudgetExhausted);
        }
        Ok(())
    }
}

/// Single-flight flag for one rule group.
///
/// Monotonic: set before any await, cleared when the guard drops. A tick
/// arriving while the flag is held is skipped, never queued; the next
/// tick re-evaluates against then-current state.
#[derive(Debug, Clone, Default)]
pub struct InFlightFlag {
    flag: Arc<AtomicBool>,
}

impl InFlightFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while an order for this rule group is outstanding.
    pub fn is_held(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Test-and-set. Returns `None` if an order is already outstanding.
    pub fn acquire(&self) -> Option<InFlightGuard> {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: Arc::clone(&self.flag),
            })
    }
}

/// RAII release of the single-flight slot.
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
