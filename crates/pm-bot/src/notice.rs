//! Operator-facing notifications.
//!
//! Connection state changes and actual submission attempts are always
//! visible; eligibility skips are not represented here at all, so normal
//! operation cannot flood the channel.

use rust_decimal::Decimal;

use pm_core::{OutcomeId, Side};
use pm_feed::{ConnectionState, ConnectionStatus};

use crate::rules::RuleKind;

/// A notification for the operator channel.
#[derive(Debug, Clone)]
pub enum Notice {
    /// The stream session changed state.
    Connection(ConnectionState),
    /// An order was accepted by the venue.
    OrderPlaced {
        outcome: OutcomeId,
        kind: RuleKind,
        side: Side,
        price: Decimal,
        size: Decimal,
    },
    /// A submission attempt failed (non-fatal).
    OrderFailed {
        outcome: OutcomeId,
        kind: RuleKind,
        reason: String,
    },
    /// A rule disabled itself (e.g. budget cap reached).
    RuleDisabled {
        outcome: OutcomeId,
        kind: RuleKind,
        reason: String,
    },
}

impl Notice {
    /// Emit this notice through the log.
    pub fn log(&self) {
        match self {
            Notice::Connection(state) => match state.status {
                ConnectionStatus::Error => tracing::error!(
                    error = state.last_error.as_deref().unwrap_or("unknown"),
                    "stream terminal error, manual reconnect required"
                ),
                ConnectionStatus::Connecting if state.retry_count > 0 => tracing::warn!(
                    retry = state.retry_count,
                    "stream reconnecting"
                ),
                status => tracing::info!(%status, "stream state changed"),
            },
            Notice::OrderPlaced {
                outcome,
                kind,
                side,
                price,
                size,
            } => tracing::info!(%outcome, %kind, %side, %price, %size, "order placed"),
            Notice::OrderFailed {
                outcome,
                kind,
                reason,
            } => tracing::warn!(%outcome, %kind, %reason, "order failed"),
            Notice::RuleDisabled {
                outcome,
                kind,
                reason,
            } => tracing::warn!(%outcome, %kind, %reason, "rule disabled"),
        }
    }
}
