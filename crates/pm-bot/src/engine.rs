//! Conditional rule engine.
//!
//! Consumes feed events in arrival order, keeps the book cache current,
//! and evaluates three rule kinds per outcome:
//!
//! - threshold buy: fires on book updates when the ask reaches a trigger
//! - periodic buy: fires on a wall-clock interval anchored to the last buy
//! - profit sell: fires on book updates when the realizable profit rate
//!   clears the configured bar
//!
//! The decision to fire is made synchronously against current state; the
//! submission itself runs on a spawned task. Two mechanisms make that
//! split safe under bursts of ticks: the per-rule-group single-flight
//! guard, and the optimistic cooldown stamp reserved before the await and
//! rolled back on failure. A submission failure never aborts the
//! evaluation loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use pm_core::{BookTop, OutcomeId, PositionSide, Side};
use pm_feed::wire::{FeedEvent, GameEndMessage, MarketMetadataMessage};
use pm_feed::MarketBookCache;

use crate::gate::{Credentials, InFlightFlag, InFlightGuard, OrderGate, OrderIntent};
use crate::gateway::{GatewayError, MarketConstraints, OrderAck, TradingGateway};
use crate::notice::Notice;
use crate::positions::PositionCache;
use crate::rules::{
    CooldownReservation, PeriodicBuyRule, ProfitSellRule, RuleKind, RuleStore, ThresholdBuyRule,
};
use crate::submit::{OrderStatsBook, OrderSubmitter};

/// Engine parameters fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Condition ID of the monitored market (position queries).
    pub condition_id: String,
    /// Position refresh cadence.
    pub refresh_interval: Duration,
    /// Minimum order size assumed until the venue reports one.
    pub default_min_order_size: Decimal,
    /// Order type used for rule fires.
    pub order_type: pm_core::OrderType,
}

/// A concrete order a rule decided to place.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlan {
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Outcome of a periodic-buy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodicDecision {
    /// Nothing to do this tick.
    Skip,
    /// Place this order.
    Fire(OrderPlan),
    /// No future tick can succeed; the rule should disable itself.
    Exhausted(String),
}

/// Completed submission, reported back into the engine loop.
#[derive(Debug)]
pub struct SubmitOutcome {
    outcome: OutcomeId,
    kind: RuleKind,
    reservation: CooldownReservation,
    side: Side,
    price: Decimal,
    size: Decimal,
    result: Result<OrderAck, GatewayError>,
    /// Held until the engine has committed or rolled back, so no tick can
    /// slip in between completion and bookkeeping.
    guard: InFlightGuard,
}

/// Internal messages feeding back into the evaluation loop.
#[derive(Debug)]
pub enum EngineMsg {
    Submitted(SubmitOutcome),
    Constraints {
        token_id: String,
        result: Result<MarketConstraints, GatewayError>,
    },
}

/// The autonomous rule engine for one monitored market.
pub struct RuleEngine<G: TradingGateway> {
    config: EngineConfig,
    gateway: Arc<G>,
    gate: OrderGate,
    rules: RuleStore,
    books: MarketBookCache,
    positions: PositionCache,
    submitter: Arc<OrderSubmitter<G>>,
    notices: mpsc::Sender<Notice>,
    outcome_by_token: HashMap<String, OutcomeId>,
    token_by_outcome: HashMap<OutcomeId, String>,
    min_order_by_token: HashMap<String, Decimal>,
    in_flight: HashMap<(OutcomeId, RuleKind), InFlightFlag>,
    last_position_refresh: Option<DateTime<Utc>>,
    msg_tx: mpsc::Sender<EngineMsg>,
    msg_rx: Option<mpsc::Receiver<EngineMsg>>,
}

impl<G: TradingGateway> RuleEngine<G> {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<G>,
        credentials: Credentials,
        rules: RuleStore,
        notices: mpsc::Sender<Notice>,
    ) -> Self {
        let proxy_address = credentials.proxy_address.clone().unwrap_or_default();
        let submitter = Arc::new(OrderSubmitter::new(
            Arc::clone(&gateway),
            proxy_address,
            config.order_type,
        ));
        let (msg_tx, msg_rx) = mpsc::channel(256);

        Self {
            config,
            gateway,
            gate: OrderGate::new(credentials),
            rules,
            books: MarketBookCache::new(),
            positions: PositionCache::new(),
            submitter,
            notices,
            outcome_by_token: HashMap::new(),
            token_by_outcome: HashMap::new(),
            min_order_by_token: HashMap::new(),
            in_flight: HashMap::new(),
            last_position_refresh: None,
            msg_tx,
            msg_rx: Some(msg_rx),
        }
    }

    pub fn books(&self) -> &MarketBookCache {
        &self.books
    }

    pub fn positions(&self) -> PositionCache {
        self.positions.clone()
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RuleStore {
        &mut self.rules
    }

    pub fn stats(&self) -> Arc<OrderStatsBook> {
        self.submitter.stats()
    }

    /// Register tradable instruments (from config at startup, or from
    /// market-metadata events), seeding default rule configs for
    /// newly-visible outcomes.
    pub fn register_instruments(&mut self, tokens: &[(String, String)]) {
        for (token_id, outcome_raw) in tokens {
            let outcome = match OutcomeId::new(outcome_raw) {
                Ok(o) => o,
                Err(e) => {
                    warn!(token = %token_id, "skipping instrument: {e}");
                    continue;
                }
            };

            let known = self.outcome_by_token.contains_key(token_id);
            self.outcome_by_token.insert(token_id.clone(), outcome.clone());
            self.token_by_outcome.insert(outcome.clone(), token_id.clone());

            if let Err(e) = self.rules.ensure_defaults(&outcome) {
                warn!(%outcome, "failed to persist default rules: {e}");
            }
            if !known {
                info!(token = %token_id, %outcome, "instrument registered");
                self.fetch_constraints(token_id.clone());
            }
        }
    }

    /// Process one feed event. Events arrive on a single queue, so book
    /// updates here are linearizable with respect to the feed.
    pub fn handle_feed_event(&mut self, event: &FeedEvent, now: DateTime<Utc>) {
        match event {
            FeedEvent::MarketMetadata(meta) => self.handle_metadata(meta),
            FeedEvent::GameEnd(msg) => self.handle_game_end(msg),
            FeedEvent::Book(_) | FeedEvent::PriceChange(_) => {
                for token_id in self.books.apply(event) {
                    self.evaluate_token(&token_id, now);
                }
            }
            FeedEvent::Heartbeat(_) => {}
        }
    }

    /// Wall-clock driver: periodic buys and the position refresh cadence.
    pub fn handle_periodic_tick(&mut self, now: DateTime<Utc>) {
        self.maybe_refresh_positions(now);

        let outcomes: Vec<OutcomeId> = self.token_by_outcome.keys().cloned().collect();
        for outcome in outcomes {
            self.try_periodic_buy(&outcome, now);
        }
    }

    /// Receive the next internal message (submission results,
    /// constraint lookups). Used directly by tests; `run` drives this.
    pub async fn recv_engine_msg(&mut self) -> Option<EngineMsg> {
        self.msg_rx.as_mut()?.recv().await
    }

    /// Apply one internal message.
    pub fn apply_engine_msg(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Submitted(outcome) => self.handle_submit_result(outcome),
            EngineMsg::Constraints { token_id, result } => match result {
                Ok(constraints) => {
                    debug!(
                        token = %token_id,
                        min_order = %constraints.minimum_order_size,
                        "market constraints cached"
                    );
                    self.min_order_by_token
                        .insert(token_id, constraints.minimum_order_size);
                }
                Err(e) => {
                    debug!(token = %token_id, "constraints unavailable, using default: {e}");
                }
            },
        }
    }

    /// Drive the engine until the feed closes or shutdown is requested.
    pub async fn run(
        mut self,
        mut feed_rx: mpsc::Receiver<FeedEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut msg_rx = self.msg_rx.take().expect("engine can only run once");
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("rule engine started");
        loop {
            tokio::select! {
                event = feed_rx.recv() => match event {
                    Some(event) => self.handle_feed_event(&event, Utc::now()),
                    None => {
                        info!("feed channel closed, engine stopping");
                        break;
                    }
                },
                Some(msg) = msg_rx.recv() => self.apply_engine_msg(msg),
                _ = ticker.tick() => self.handle_periodic_tick(Utc::now()),
                _ = shutdown.recv() => {
                    info!("engine shutdown requested");
                    break;
                }
            }
        }
    }

    fn handle_metadata(&mut self, meta: &MarketMetadataMessage) {
        if meta.market != self.config.condition_id {
            debug!(market = %meta.market, "metadata for another market, ignored");
            return;
        }
        let tokens: Vec<(String, String)> = meta
            .tokens
            .iter()
            .map(|t| (t.token_id.clone(), t.outcome.clone()))
            .collect();
        self.register_instruments(&tokens);
    }

    fn handle_game_end(&mut self, msg: &GameEndMessage) {
        if msg.market != self.config.condition_id {
            return;
        }
        info!("monitored event ended, dropping its rule configs");
        let outcomes: Vec<OutcomeId> = self.token_by_outcome.keys().cloned().collect();
        for outcome in outcomes {
            if let Err(e) = self.rules.remove_outcome(&outcome) {
                warn!(%outcome, "failed to drop rules: {e}");
            }
        }
        self.outcome_by_token.clear();
        self.token_by_outcome.clear();
    }

    fn evaluate_token(&mut self, token_id: &str, now: DateTime<Utc>) {
        let Some(outcome) = self.outcome_by_token.get(token_id).cloned() else {
            return;
        };
        let Some(top) = self.books.top(token_id) else {
            return;
        };
        self.try_threshold_buy(&outcome, token_id, &top, now);
        self.try_profit_sell(&outcome, token_id, &top, now);
    }

    fn try_threshold_buy(
        &mut self,
        outcome: &OutcomeId,
        token_id: &str,
        top: &BookTop,
        now: DateTime<Utc>,
    ) {
        let rule = self.rules.threshold_buy(outcome);
        let Some(plan) = plan_threshold_buy(&rule, top, now) else {
            return;
        };

        let intent = OrderIntent {
            budget: rule.budget,
            price: plan.price,
            cooldown_ok: cooldown_elapsed(rule.last_buy_at, rule.cooldown_secs, now),
            cap_ok: true,
        };
        let flag = self.flag(outcome, RuleKind::ThresholdBuy);
        if let Err(reason) = self.gate.check(&flag, &intent) {
            debug!(%outcome, code = reason.code(), "threshold buy skipped: {reason}");
            return;
        }
        let Some(guard) = flag.acquire() else {
            return;
        };

        let reservation = self.rules.reserve(outcome, RuleKind::ThresholdBuy, now);
        self.launch(
            outcome.clone(),
            RuleKind::ThresholdBuy,
            token_id.to_string(),
            plan,
            reservation,
            guard,
        );
    }

    fn try_profit_sell(
        &mut self,
        outcome: &OutcomeId,
        token_id: &str,
        top: &BookTop,
        now: DateTime<Utc>,
    ) {
        let rule = self.rules.profit_sell(outcome);
        if !rule.enabled {
            return;
        }
        let Some(position) = self.positions.side(outcome.as_str()) else {
            return;
        };
        let Some(plan) = plan_profit_sell(&rule, top, &position, now) else {
            return;
        };

        let intent = OrderIntent {
            budget: plan.price * plan.size,
            price: plan.price,
            cooldown_ok: cooldown_elapsed(rule.last_sell_at, rule.cooldown_secs, now),
            cap_ok: true,
        };
        let flag = self.flag(outcome, RuleKind::ProfitSell);
        if let Err(reason) = self.gate.check(&flag, &intent) {
            debug!(%outcome, code = reason.code(), "profit sell skipped: {reason}");
            return;
        }
        let Some(guard) = flag.acquire() else {
            return;
        };

        let reservation = self.rules.reserve(outcome, RuleKind::ProfitSell, now);
        self.launch(
            outcome.clone(),
            RuleKind::ProfitSell,
            token_id.to_string(),
            plan,
            reservation,
            guard,
        );
    }

    fn try_periodic_buy(&mut self, outcome: &OutcomeId, now: DateTime<Utc>) {
        let rule = self.rules.periodic_buy(outcome);
        if !rule.enabled {
            return;
        }
        let Some(token_id) = self.token_by_outcome.get(outcome).cloned() else {
            return;
        };
        let top = self.books.top(&token_id);
        let min_order = self.min_order(&token_id);

        match plan_periodic_buy(&rule, top.as_ref(), min_order, now) {
            PeriodicDecision::Skip => {}
            PeriodicDecision::Exhausted(reason) => {
                if let Err(e) = self.rules.disable(outcome, RuleKind::PeriodicBuy) {
                    warn!(%outcome, "failed to persist disable: {e}");
                }
                warn!(%outcome, %reason, "periodic buy disabled");
                self.notify(Notice::RuleDisabled {
                    outcome: outcome.clone(),
                    kind: RuleKind::PeriodicBuy,
                    reason,
                });
            }
            PeriodicDecision::Fire(plan) => {
                let intent = OrderIntent {
                    budget: plan.price * plan.size,
                    price: plan.price,
                    cooldown_ok: periodic_due(&rule, now),
                    cap_ok: rule.max_total_budget.is_zero()
                        || rule.total_spent < rule.max_total_budget,
                };
                let flag = self.flag(outcome, RuleKind::PeriodicBuy);
                if let Err(reason) = self.gate.check(&flag, &intent) {
                    debug!(%outcome, code = reason.code(), "periodic buy skipped: {reason}");
                    return;
                }
                let Some(guard) = flag.acquire() else {
                    return;
                };

                let reservation = self.rules.reserve(outcome, RuleKind::PeriodicBuy, now);
                self.launch(
                    outcome.clone(),
                    RuleKind::PeriodicBuy,
                    token_id,
                    plan,
                    reservation,
                    guard,
                );
            }
        }
    }

    /// Spawn the submission; the result re-enters the loop as a message.
    fn launch(
        &self,
        outcome: OutcomeId,
        kind: RuleKind,
        token_id: String,
        plan: OrderPlan,
        reservation: CooldownReservation,
        guard: InFlightGuard,
    ) {
        let submitter = Arc::clone(&self.submitter);
        let msg_tx = self.msg_tx.clone();

        tokio::spawn(async move {
            let result = submitter
                .submit(&outcome, &token_id, plan.side, plan.price, plan.size)
                .await;
            let msg = EngineMsg::Submitted(SubmitOutcome {
                outcome,
                kind,
                reservation,
                side: plan.side,
                price: plan.price,
                size: plan.size,
                result,
                guard,
            });
            let _ = msg_tx.send(msg).await;
        });
    }

    fn handle_submit_result(&mut self, out: SubmitOutcome) {
        match out.result {
            Ok(ack) => {
                let spent =
                    ack.filled_price.unwrap_or(out.price) * ack.filled_size.unwrap_or(out.size);
                if let Err(e) = self.rules.commit(out.reservation, spent) {
                    warn!(outcome = %out.outcome, "rule persistence failed: {e}");
                }

                if out.kind == RuleKind::PeriodicBuy {
                    let rule = self.rules.periodic_buy(&out.outcome);
                    if rule.enabled
                        && !rule.max_total_budget.is_zero()
                        && rule.total_spent >= rule.max_total_budget
                    {
                        if let Err(e) = self.rules.disable(&out.outcome, RuleKind::PeriodicBuy) {
                            warn!(outcome = %out.outcome, "failed to persist disable: {e}");
                        }
                        self.notify(Notice::RuleDisabled {
                            outcome: out.outcome.clone(),
                            kind: RuleKind::PeriodicBuy,
                            reason: format!(
                                "total budget cap reached ({} of {})",
                                rule.total_spent, rule.max_total_budget
                            ),
                        });
                    }
                }

                self.notify(Notice::OrderPlaced {
                    outcome: out.outcome,
                    kind: out.kind,
                    side: out.side,
                    price: out.price,
                    size: out.size,
                });

                // holdings changed; later profit-sell evaluations depend
                // on a fresh snapshot
                self.schedule_position_refresh();
            }
            Err(err) => {
                self.rules.release(out.reservation);
                warn!(outcome = %out.outcome, kind = %out.kind, "submission failed: {err}");
                self.notify(Notice::OrderFailed {
                    outcome: out.outcome,
                    kind: out.kind,
                    reason: err.to_string(),
                });
            }
        }
        // out.guard drops here, releasing the single-flight slot only
        // after commit/rollback is applied
    }

    fn maybe_refresh_positions(&mut self, now: DateTime<Utc>) {
        let due = self.last_position_refresh.map_or(true, |t| {
            now.signed_duration_since(t)
                .to_std()
                .map_or(false, |e| e >= self.config.refresh_interval)
        });
        if due && !self.positions.is_refreshing() {
            self.last_position_refresh = Some(now);
            self.schedule_position_refresh();
        }
    }

    fn schedule_position_refresh(&self) {
        let outcomes: Vec<String> = self
            .token_by_outcome
            .keys()
            .map(|o| o.as_str().to_string())
            .collect();
        if outcomes.is_empty() {
            return;
        }
        self.positions.spawn_refresh(
            Arc::clone(&self.gateway),
            self.config.condition_id.clone(),
            outcomes,
        );
    }

    fn fetch_constraints(&self, token_id: String) {
        let gateway = Arc::clone(&self.gateway);
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let result = gateway.market_constraints(&token_id).await;
            let _ = tx.send(EngineMsg::Constraints { token_id, result }).await;
        });
    }

    fn min_order(&self, token_id: &str) -> Decimal {
        self.min_order_by_token
            .get(token_id)
            .copied()
            .unwrap_or(self.config.default_min_order_size)
    }

    fn flag(&mut self, outcome: &OutcomeId, kind: RuleKind) -> InFlightFlag {
        self.in_flight
            .entry((outcome.clone(), kind))
            .or_default()
            .clone()
    }

    fn notify(&self, notice: Notice) {
        if self.notices.try_send(notice).is_err() {
            debug!("notice channel full or closed, notice dropped");
        }
    }
}

/// True once `cooldown_secs` have elapsed since `last` (or it never fired).
pub fn cooldown_elapsed(last: Option<DateTime<Utc>>, cooldown_secs: u64, now: DateTime<Utc>) -> bool {
    match last {
        None => true,
        Some(t) => now.signed_duration_since(t).num_seconds() >= cooldown_secs as i64,
    }
}

/// True once the periodic interval has elapsed since the last buy.
pub fn periodic_due(rule: &PeriodicBuyRule, now: DateTime<Utc>) -> bool {
    cooldown_elapsed(rule.last_buy_at, rule.interval_secs, now)
}

/// Threshold-buy decision: fire when the ask is at or below the trigger
/// and the cooldown has elapsed.
pub fn plan_threshold_buy(
    rule: &ThresholdBuyRule,
    top: &BookTop,
    now: DateTime<Utc>,
) -> Option<OrderPlan> {
    if !rule.enabled {
        return None;
    }
    let ask = top.best_ask?;
    if ask <= Decimal::ZERO || ask >= Decimal::ONE {
        return None;
    }
    if ask > rule.trigger_price {
        return None;
    }
    if !cooldown_elapsed(rule.last_buy_at, rule.cooldown_secs, now) {
        return None;
    }
    if rule.budget <= Decimal::ZERO {
        return None;
    }

    let mut size = rule.budget / ask;
    if rule.round_size {
        size = size.floor();
    }
    if size <= Decimal::ZERO {
        return None;
    }

    Some(OrderPlan {
        side: Side::Buy,
        price: ask,
        size,
    })
}

/// Periodic-buy decision.
///
/// A capped rule whose remaining budget can no longer produce a valid
/// order (cap reached, or below the venue minimum size) is `Exhausted`
/// and should disable itself: no future tick can ever succeed.
pub fn plan_periodic_buy(
    rule: &PeriodicBuyRule,
    top: Option<&BookTop>,
    min_order_size: Decimal,
    now: DateTime<Utc>,
) -> PeriodicDecision {
    if !rule.enabled || !periodic_due(rule, now) {
        return PeriodicDecision::Skip;
    }

    let capped = !rule.max_total_budget.is_zero();
    if capped && rule.total_spent >= rule.max_total_budget {
        return PeriodicDecision::Exhausted("total budget cap reached".to_string());
    }

    let Some(ask) = top.and_then(|t| t.best_ask) else {
        return PeriodicDecision::Skip;
    };
    if ask <= Decimal::ZERO || ask >= Decimal::ONE {
        return PeriodicDecision::Skip;
    }

    let effective_budget = if capped {
        rule.budget.min(rule.max_total_budget - rule.total_spent)
    } else {
        rule.budget
    };
    if effective_budget <= Decimal::ZERO {
        return PeriodicDecision::Exhausted("no budget remaining".to_string());
    }

    let size = effective_budget / ask;
    if size < min_order_size {
        return PeriodicDecision::Exhausted(format!(
            "remaining budget buys {size} shares, below the venue minimum of {min_order_size}"
        ));
    }

    PeriodicDecision::Fire(OrderPlan {
        side: Side::Buy,
        price: ask,
        size,
    })
}

/// Profit-sell decision: fire when the realizable profit rate at the
/// best bid clears the configured bar.
pub fn plan_profit_sell(
    rule: &ProfitSellRule,
    top: &BookTop,
    position: &PositionSide,
    now: DateTime<Utc>,
) -> Option<OrderPlan> {
    if !rule.enabled {
        return None;
    }
    if position.size <= Decimal::ZERO {
        return None;
    }
    let bid = top.best_bid?;
    if bid <= Decimal::ZERO || bid >= Decimal::ONE {
        return None;
    }
    let avg = position.avg_price?;
    if avg <= Decimal::ZERO {
        return None;
    }

    let profit_rate = (bid - avg) / avg;
    if profit_rate < rule.min_profit_rate_pct / Decimal::ONE_HUNDRED {
        return None;
    }
    if !cooldown_elapsed(rule.last_sell_at, rule.cooldown_secs, now) {
        return None;
    }

    let size = position.size * rule.sell_ratio_pct / Decimal::ONE_HUNDRED;
    if size <= Decimal::ZERO {
        return None;
    }

    Some(OrderPlan {
        side: Side::Sell,
        price: bid,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn top_with(bid: Option<Decimal>, ask: Option<Decimal>) -> BookTop {
        BookTop {
            token_id: "t1".to_string(),
            best_bid: bid,
            best_ask: ask,
            bid_size: None,
            ask_size: None,
            updated_at: Utc::now(),
        }
    }

    fn position(size: Decimal, avg: Option<Decimal>) -> PositionSide {
        PositionSide {
            outcome: "Lakers".to_string(),
            size,
            avg_price: avg,
            cur_price: None,
            initial_value: None,
        }
    }

    #[test]
    fn test_cooldown_elapsed() {
        let now = Utc::now();
        assert!(cooldown_elapsed(None, 60, now));
        assert!(!cooldown_elapsed(Some(now), 60, now));
        assert!(cooldown_elapsed(
            Some(now - chrono::Duration::seconds(61)),
            60,
            now
        ));
        assert!(cooldown_elapsed(
            Some(now - chrono::Duration::seconds(60)),
            60,
            now
        ));
    }

    #[test]
    fn test_threshold_buy_fires_at_or_below_trigger() {
        let now = Utc::now();
        let mut rule = ThresholdBuyRule::default();
        rule.enabled = true;
        rule.trigger_price = dec!(0.40);
        rule.budget = dec!(10);

        // above trigger: no fire
        assert!(plan_threshold_buy(&rule, &top_with(None, Some(dec!(0.41))), now).is_none());

        // at trigger: fires, size = budget / ask
        let plan = plan_threshold_buy(&rule, &top_with(None, Some(dec!(0.40))), now).unwrap();
        assert_eq!(plan.side, Side::Buy);
        assert_eq!(plan.price, dec!(0.40));
        assert_eq!(plan.size, dec!(25));
    }

    #[test]
    fn test_threshold_buy_requires_enabled_ask_and_cooldown() {
        let now = Utc::now();
        let mut rule = ThresholdBuyRule::default();
        rule.trigger_price = dec!(0.40);

        // disabled
        assert!(plan_threshold_buy(&rule, &top_with(None, Some(dec!(0.30))), now).is_none());

        rule.enabled = true;
        // no ask at all
        assert!(plan_threshold_buy(&rule, &top_with(Some(dec!(0.30)), None), now).is_none());

        // cooldown still running
        rule.last_buy_at = Some(now - chrono::Duration::seconds(10));
        assert!(plan_threshold_buy(&rule, &top_with(None, Some(dec!(0.30))), now).is_none());
    }

    #[test]
    fn test_threshold_buy_round_size_floors() {
        let now = Utc::now();
        let mut rule = ThresholdBuyRule::default();
        rule.enabled = true;
        rule.trigger_price = dec!(0.50);
        rule.budget = dec!(10);
        rule.round_size = true;

        let plan = plan_threshold_buy(&rule, &top_with(None, Some(dec!(0.30))), now).unwrap();
        // 10 / 0.30 = 33.33... floored
        assert_eq!(plan.size, dec!(33));
    }

    #[test]
    fn test_periodic_buy_uncapped_never_exhausts() {
        let now = Utc::now();
        let mut rule = PeriodicBuyRule::default();
        rule.enabled = true;
        rule.budget = dec!(10);
        rule.interval_secs = 60;
        rule.total_spent = dec!(100000);

        let top = top_with(None, Some(dec!(0.50)));
        match plan_periodic_buy(&rule, Some(&top), Decimal::ONE, now) {
            PeriodicDecision::Fire(plan) => assert_eq!(plan.size, dec!(20)),
            other => panic!("expected Fire, got {other:?}"),
        }
    }

    #[test]
    fn test_periodic_buy_clamps_to_remaining_cap() {
        let now = Utc::now();
        let mut rule = PeriodicBuyRule::default();
        rule.enabled = true;
        rule.budget = dec!(30);
        rule.max_total_budget = dec!(50);
        rule.total_spent = dec!(30);

        let top = top_with(None, Some(dec!(0.50)));
        match plan_periodic_buy(&rule, Some(&top), Decimal::ONE, now) {
            // effective budget min(30, 20) = 20 -> 40 shares
            PeriodicDecision::Fire(plan) => assert_eq!(plan.size, dec!(40)),
            other => panic!("expected Fire, got {other:?}"),
        }
    }

    #[test]
    fn test_periodic_buy_exhausts_at_cap() {
        let now = Utc::now();
        let mut rule = PeriodicBuyRule::default();
        rule.enabled = true;
        rule.budget = dec!(30);
        rule.max_total_budget = dec!(50);
        rule.total_spent = dec!(50);

        let top = top_with(None, Some(dec!(0.50)));
        assert!(matches!(
            plan_periodic_buy(&rule, Some(&top), Decimal::ONE, now),
            PeriodicDecision::Exhausted(_)
        ));
    }

    #[test]
    fn test_periodic_buy_exhausts_below_venue_minimum() {
        let now = Utc::now();
        let mut rule = PeriodicBuyRule::default();
        rule.enabled = true;
        rule.budget = dec!(30);
        rule.max_total_budget = dec!(50);
        rule.total_spent = dec!(49.50);

        // remaining 0.50 buys 1 share at 0.50; venue minimum is 5
        let top = top_with(None, Some(dec!(0.50)));
        assert!(matches!(
            plan_periodic_buy(&rule, Some(&top), dec!(5), now),
            PeriodicDecision::Exhausted(_)
        ));
    }

    #[test]
    fn test_periodic_buy_waits_for_interval() {
        let now = Utc::now();
        let mut rule = PeriodicBuyRule::default();
        rule.enabled = true;
        rule.interval_secs = 300;
        rule.last_buy_at = Some(now - chrono::Duration::seconds(100));

        let top = top_with(None, Some(dec!(0.50)));
        assert_eq!(
            plan_periodic_buy(&rule, Some(&top), Decimal::ONE, now),
            PeriodicDecision::Skip
        );

        // without an ask there is nothing to price against
        rule.last_buy_at = None;
        assert_eq!(
            plan_periodic_buy(&rule, None, Decimal::ONE, now),
            PeriodicDecision::Skip
        );
    }

    #[test]
    fn test_profit_sell_rate_boundary() {
        let now = Utc::now();
        let mut rule = ProfitSellRule::default();
        rule.enabled = true;
        rule.min_profit_rate_pct = dec!(10);
        rule.sell_ratio_pct = dec!(50);

        let pos = position(dec!(100), Some(dec!(0.40)));

        // 0.46: profit rate 15% >= 10%, fires
        let plan =
            plan_profit_sell(&rule, &top_with(Some(dec!(0.46)), None), &pos, now).unwrap();
        assert_eq!(plan.side, Side::Sell);
        assert_eq!(plan.price, dec!(0.46));
        assert_eq!(plan.size, dec!(50));

        // 0.43: profit rate 7.5% < 10%, does not fire
        assert!(plan_profit_sell(&rule, &top_with(Some(dec!(0.43)), None), &pos, now).is_none());

        // exactly 10%: fires
        assert!(plan_profit_sell(&rule, &top_with(Some(dec!(0.44)), None), &pos, now).is_some());
    }

    #[test]
    fn test_profit_sell_requires_position_bid_and_avg() {
        let now = Utc::now();
        let mut rule = ProfitSellRule::default();
        rule.enabled = true;

        // flat position
        assert!(plan_profit_sell(
            &rule,
            &top_with(Some(dec!(0.90)), None),
            &position(Decimal::ZERO, Some(dec!(0.40))),
            now
        )
        .is_none());

        // no bid
        assert!(plan_profit_sell(
            &rule,
            &top_with(None, Some(dec!(0.90))),
            &position(dec!(100), Some(dec!(0.40))),
            now
        )
        .is_none());

        // no average price
        assert!(plan_profit_sell(
            &rule,
            &top_with(Some(dec!(0.90)), None),
            &position(dec!(100), None),
            now
        )
        .is_none());
    }

    #[test]
    fn test_profit_sell_cooldown() {
        let now = Utc::now();
        let mut rule = ProfitSellRule::default();
        rule.enabled = true;
        rule.cooldown_secs = 60;
        rule.last_sell_at = Some(now - chrono::Duration::seconds(30));

        let pos = position(dec!(100), Some(dec!(0.40)));
        assert!(plan_profit_sell(&rule, &top_with(Some(dec!(0.90)), None), &pos, now).is_none());

        rule.last_sell_at = Some(now - chrono::Duration::seconds(61));
        assert!(plan_profit_sell(&rule, &top_with(Some(dec!(0.90)), None), &pos, now).is_some());
    }
}
