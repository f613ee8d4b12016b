//! One-shot order submission and per-outcome statistics.
//!
//! The submitter builds a wire request, sends it exactly once, and folds
//! the result into running statistics. Retry policy deliberately lives
//! with the rules: a failed fire is "try again next tick".

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use pm_core::{OrderType, OutcomeId, Side};

use crate::gateway::{GatewayError, OrderAck, OrderRequest, TradingGateway};

/// Running per-outcome order statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeStats {
    /// Accepted orders.
    pub orders: u64,
    /// Cumulative filled notional (price * size).
    pub cumulative_amount: Decimal,
}

/// Statistics book, keyed by outcome.
#[derive(Debug, Default)]
pub struct OrderStatsBook {
    inner: DashMap<OutcomeId, OutcomeStats>,
}

impl OrderStatsBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one accepted order into the book.
    pub fn record(&self, outcome: &OutcomeId, amount: Decimal) {
        let mut entry = self.inner.entry(outcome.clone()).or_default();
        entry.orders += 1;
        entry.cumulative_amount += amount;
    }

    /// Stats for one outcome.
    pub fn get(&self, outcome: &OutcomeId) -> OutcomeStats {
        self.inner
            .get(outcome)
            .map(|r| *r.value())
            .unwrap_or_default()
    }

    /// Stats summed across all outcomes.
    pub fn totals(&self) -> OutcomeStats {
        let mut totals = OutcomeStats::default();
        for entry in self.inner.iter() {
            totals.orders += entry.orders;
            totals.cumulative_amount += entry.cumulative_amount;
        }
        totals
    }
}

/// Builds and sends one order request per call.
pub struct OrderSubmitter<G> {
    gateway: Arc<G>,
    proxy_address: String,
    order_type: OrderType,
    stats: Arc<OrderStatsBook>,
}

impl<G: TradingGateway> OrderSubmitter<G> {
    pub fn new(gateway: Arc<G>, proxy_address: String, order_type: OrderType) -> Self {
        Self {
            gateway,
            proxy_address,
            order_type,
            stats: Arc::new(OrderStatsBook::new()),
        }
    }

    pub fn stats(&self) -> Arc<OrderStatsBook> {
        Arc::clone(&self.stats)
    }

    /// Submit one order; never retries.
    ///
    /// On acceptance the filled notional (echoed fill fields when
    /// present, the request otherwise) is folded into the stats book.
    pub async fn submit(
        &self,
        outcome: &OutcomeId,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<OrderAck, GatewayError> {
        let request = OrderRequest {
            request_id: Uuid::new_v4().to_string(),
            token_id: token_id.to_string(),
            side,
            price,
            size,
            order_type: self.order_type,
            proxy_address: self.proxy_address.clone(),
        };

        debug!(
            request_id = %request.request_id,
            %outcome,
            %side,
            %price,
            %size,
            "sending order"
        );

        let ack = self.gateway.submit_order(&request).await?;

        let amount = ack.filled_price.unwrap_or(price) * ack.filled_size.unwrap_or(size);
        self.stats.record(outcome, amount);
        info!(
            %outcome,
            %side,
            %price,
            %size,
            order_id = ack.order_id.as_deref().unwrap_or("-"),
            "order accepted"
        );

        Ok(ack)
    }
}
