//! Durable per-outcome trading rule store.
//!
//! Each outcome carries one config per rule kind, created with defaults
//! the first time the outcome becomes visible, mutated only by operator
//! input, and persisted synchronously on every mutation. The file schema
//! tolerates missing keys so new fields can be added without migration.
//!
//! Cooldown stamping is two-phase: `reserve` records the stamp before a
//! submission is awaited (so a burst of ticks cannot pass the cooldown
//! check twice), then `commit` keeps it or `release` rolls it back.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use pm_core::OutcomeId;

/// The three conditional rule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    ThresholdBuy,
    PeriodicBuy,
    ProfitSell,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::ThresholdBuy => "threshold_buy",
            RuleKind::PeriodicBuy => "periodic_buy",
            RuleKind::ProfitSell => "profit_sell",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_trigger_price() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_budget() -> Decimal {
    Decimal::new(10, 0) // $10
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_interval_secs() -> u64 {
    300
}

fn default_min_profit_rate_pct() -> Decimal {
    Decimal::new(10, 0) // 10%
}

fn default_sell_ratio_pct() -> Decimal {
    Decimal::new(50, 0) // 50%
}

/// Buy when the best ask drops to the trigger price or below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBuyRule {
    #[serde(default)]
    pub enabled: bool,
    /// Fire when `best_ask <= trigger_price`.
    #[serde(default = "default_trigger_price")]
    pub trigger_price: Decimal,
    /// USDC spent per fire.
    #[serde(default = "default_budget")]
    pub budget: Decimal,
    /// Minimum seconds between successful fires.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Floor the share size to a whole number.
    #[serde(default)]
    pub round_size: bool,
    /// Last successful (or reserved) fire.
    #[serde(default)]
    pub last_buy_at: Option<DateTime<Utc>>,
}

impl Default for ThresholdBuyRule {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_price: default_trigger_price(),
            budget: default_budget(),
            cooldown_secs: default_cooldown_secs(),
            round_size: false,
            last_buy_at: None,
        }
    }
}

/// Buy a fixed budget on a wall-clock interval while enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicBuyRule {
    #[serde(default)]
    pub enabled: bool,
    /// USDC spent per interval.
    #[serde(default = "default_budget")]
    pub budget: Decimal,
    /// Interval between buys, anchored to `last_buy_at`.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Cumulative spend cap; zero means uncapped.
    #[serde(default)]
    pub max_total_budget: Decimal,
    /// Successful buys so far.
    #[serde(default)]
    pub buy_count: u32,
    /// USDC spent so far.
    #[serde(default)]
    pub total_spent: Decimal,
    #[serde(default)]
    pub last_buy_at: Option<DateTime<Utc>>,
}

impl Default for PeriodicBuyRule {
    fn default() -> Self {
        Self {
            enabled: false,
            budget: default_budget(),
            interval_secs: default_interval_secs(),
            max_total_budget: Decimal::ZERO,
            buy_count: 0,
            total_spent: Decimal::ZERO,
            last_buy_at: None,
        }
    }
}

/// Sell part of a position once the realizable profit rate clears a bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitSellRule {
    #[serde(default)]
    pub enabled: bool,
    /// Fire when `(best_bid - avg_price) / avg_price >= this / 100`.
    #[serde(default = "default_min_profit_rate_pct")]
    pub min_profit_rate_pct: Decimal,
    /// Percentage of the position to sell per fire.
    #[serde(default = "default_sell_ratio_pct")]
    pub sell_ratio_pct: Decimal,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub last_sell_at: Option<DateTime<Utc>>,
}

impl Default for ProfitSellRule {
    fn default() -> Self {
        Self {
            enabled: false,
            min_profit_rate_pct: default_min_profit_rate_pct(),
            sell_ratio_pct: default_sell_ratio_pct(),
            cooldown_secs: default_cooldown_secs(),
            last_sell_at: None,
        }
    }
}

/// One rule config, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleConfig {
    ThresholdBuy(ThresholdBuyRule),
    PeriodicBuy(PeriodicBuyRule),
    ProfitSell(ProfitSellRule),
}

/// On-disk schema: one keyed map per rule kind.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RuleFile {
    #[serde(default)]
    threshold_buy: BTreeMap<OutcomeId, ThresholdBuyRule>,
    #[serde(default)]
    periodic_buy: BTreeMap<OutcomeId, PeriodicBuyRule>,
    #[serde(default)]
    profit_sell: BTreeMap<OutcomeId, ProfitSellRule>,
}

/// Errors from loading or persisting the rule store.
#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("rule file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rule file format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// An optimistic cooldown stamp awaiting commit or rollback.
///
/// Returned by `RuleStore::reserve`; carries the prior stamp so a failed
/// submission can restore it and retry on its next natural trigger.
#[derive(Debug)]
#[must_use = "a reservation must be committed or released"]
pub struct CooldownReservation {
    outcome: OutcomeId,
    kind: RuleKind,
    previous: Option<DateTime<Utc>>,
}

impl CooldownReservation {
    pub fn outcome(&self) -> &OutcomeId {
        &self.outcome
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }
}

/// Keyed store of rule configs with synchronous file persistence.
#[derive(Debug)]
pub struct RuleStore {
    path: Option<PathBuf>,
    file: RuleFile,
}

impl RuleStore {
    /// Store without persistence (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: RuleFile::default(),
        }
    }

    /// Load from `path`; a missing file yields an empty store.
    pub fn load(path: PathBuf) -> Result<Self, RuleStoreError> {
        let file = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no rule file yet, starting empty");
                RuleFile::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            file,
        })
    }

    fn persist(&self) -> Result<(), RuleStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(&self.file)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Threshold-buy config for an outcome (default if never set).
    pub fn threshold_buy(&self, outcome: &OutcomeId) -> ThresholdBuyRule {
        self.file
            .threshold_buy
            .get(outcome)
            .cloned()
            .unwrap_or_default()
    }

    /// Periodic-buy config for an outcome (default if never set).
    pub fn periodic_buy(&self, outcome: &OutcomeId) -> PeriodicBuyRule {
        self.file
            .periodic_buy
            .get(outcome)
            .cloned()
            .unwrap_or_default()
    }

    /// Profit-sell config for an outcome (default if never set).
    pub fn profit_sell(&self, outcome: &OutcomeId) -> ProfitSellRule {
        self.file
            .profit_sell
            .get(outcome)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_threshold_buy(
        &mut self,
        outcome: &OutcomeId,
        rule: ThresholdBuyRule,
    ) -> Result<(), RuleStoreError> {
        self.file.threshold_buy.insert(outcome.clone(), rule);
        self.persist()
    }

    pub fn set_periodic_buy(
        &mut self,
        outcome: &OutcomeId,
        rule: PeriodicBuyRule,
    ) -> Result<(), RuleStoreError> {
        self.file.periodic_buy.insert(outcome.clone(), rule);
        self.persist()
    }

    pub fn set_profit_sell(
        &mut self,
        outcome: &OutcomeId,
        rule: ProfitSellRule,
    ) -> Result<(), RuleStoreError> {
        self.file.profit_sell.insert(outcome.clone(), rule);
        self.persist()
    }

    /// Materialize default configs for a newly visible outcome.
    ///
    /// Returns true if anything was created.
    pub fn ensure_defaults(&mut self, outcome: &OutcomeId) -> Result<bool, RuleStoreError> {
        let mut created = false;
        if !self.file.threshold_buy.contains_key(outcome) {
            self.file
                .threshold_buy
                .insert(outcome.clone(), ThresholdBuyRule::default());
            created = true;
        }
        if !self.file.periodic_buy.contains_key(outcome) {
            self.file
                .periodic_buy
                .insert(outcome.clone(), PeriodicBuyRule::default());
            created = true;
        }
        if !self.file.profit_sell.contains_key(outcome) {
            self.file
                .profit_sell
                .insert(outcome.clone(), ProfitSellRule::default());
            created = true;
        }
        if created {
            self.persist()?;
        }
        Ok(created)
    }

    /// Drop all configs for an outcome (monitored event ended).
    pub fn remove_outcome(&mut self, outcome: &OutcomeId) -> Result<(), RuleStoreError> {
        self.file.threshold_buy.remove(outcome);
        self.file.periodic_buy.remove(outcome);
        self.file.profit_sell.remove(outcome);
        self.persist()
    }

    /// Disable one rule, persisting immediately.
    pub fn disable(&mut self, outcome: &OutcomeId, kind: RuleKind) -> Result<(), RuleStoreError> {
        match kind {
            RuleKind::ThresholdBuy => {
                self.file
                    .threshold_buy
                    .entry(outcome.clone())
                    .or_default()
                    .enabled = false;
            }
            RuleKind::PeriodicBuy => {
                self.file
                    .periodic_buy
                    .entry(outcome.clone())
                    .or_default()
                    .enabled = false;
            }
            RuleKind::ProfitSell => {
                self.file
                    .profit_sell
                    .entry(outcome.clone())
                    .or_default()
                    .enabled = false;
            }
        }
        self.persist()
    }

    /// Every outcome with at least one config.
    pub fn outcomes(&self) -> BTreeSet<OutcomeId> {
        self.file
            .threshold_buy
            .keys()
            .chain(self.file.periodic_buy.keys())
            .chain(self.file.profit_sell.keys())
            .cloned()
            .collect()
    }

    /// All configs, tagged by kind.
    pub fn all(&self) -> Vec<(OutcomeId, RuleConfig)> {
        let mut out = Vec::new();
        for (k, v) in &self.file.threshold_buy {
            out.push((k.clone(), RuleConfig::ThresholdBuy(v.clone())));
        }
        for (k, v) in &self.file.periodic_buy {
            out.push((k.clone(), RuleConfig::PeriodicBuy(v.clone())));
        }
        for (k, v) in &self.file.profit_sell {
            out.push((k.clone(), RuleConfig::ProfitSell(v.clone())));
        }
        out
    }

    /// Stamp the cooldown timestamp optimistically, before the
    /// submission is awaited. In-memory only; the stamp reaches disk on
    /// `commit`.
    pub fn reserve(
        &mut self,
        outcome: &OutcomeId,
        kind: RuleKind,
        now: DateTime<Utc>,
    ) -> CooldownReservation {
        let previous = match kind {
            RuleKind::ThresholdBuy => {
                let rule = self.file.threshold_buy.entry(outcome.clone()).or_default();
                rule.last_buy_at.replace(now)
            }
            RuleKind::PeriodicBuy => {
                let rule = self.file.periodic_buy.entry(outcome.clone()).or_default();
                rule.last_buy_at.replace(now)
            }
            RuleKind::ProfitSell => {
                let rule = self.file.profit_sell.entry(outcome.clone()).or_default();
                rule.last_sell_at.replace(now)
            }
        };

        CooldownReservation {
            outcome: outcome.clone(),
            kind,
            previous,
        }
    }

    /// Keep a reserved stamp after a successful submission, folding the
    /// realized spend into periodic-buy runtime state, and persist.
    pub fn commit(
        &mut self,
        reservation: CooldownReservation,
        spent: Decimal,
    ) -> Result<(), RuleStoreError> {
        if reservation.kind == RuleKind::PeriodicBuy {
            let rule = self
                .file
                .periodic_buy
                .entry(reservation.outcome.clone())
                .or_default();
            rule.buy_count += 1;
            rule.total_spent += spent;
        }
        self.persist()
    }

    /// Roll a reserved stamp back after a failed submission so the rule
    /// does not serve a cooldown it never earned.
    pub fn release(&mut self, reservation: CooldownReservation) {
        match reservation.kind {
            RuleKind::ThresholdBuy => {
                if let Some(rule) = self.file.threshold_buy.get_mut(&reservation.outcome) {
                    rule.last_buy_at = reservation.previous;
                }
            }
            RuleKind::PeriodicBuy => {
                if let Some(rule) = self.file.periodic_buy.get_mut(&reservation.outcome) {
                    rule.last_buy_at = reservation.previous;
                }
            }
            RuleKind::ProfitSell => {
                if let Some(rule) = self.file.profit_sell.get_mut(&reservation.outcome) {
                    rule.last_sell_at = reservation.previous;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn outcome(label: &str) -> OutcomeId {
        OutcomeId::new(label).unwrap()
    }

    #[test]
    fn test_unseen_outcome_returns_defaults() {
        let store = RuleStore::in_memory();
        let rule = store.threshold_buy(&outcome("Lakers"));
        assert!(!rule.enabled);
        assert_eq!(rule.trigger_price, dec!(0.10));
        assert_eq!(rule.budget, dec!(10));
        assert_eq!(rule.cooldown_secs, 60);

        let rule = store.periodic_buy(&outcome("Lakers"));
        assert_eq!(rule.max_total_budget, Decimal::ZERO);
        assert_eq!(rule.buy_count, 0);

        let rule = store.profit_sell(&outcome("Lakers"));
        assert_eq!(rule.min_profit_rate_pct, dec!(10));
        assert_eq!(rule.sell_ratio_pct, dec!(50));
    }

    #[test]
    fn test_set_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");

        let mut store = RuleStore::load(path.clone()).unwrap();
        let mut rule = ThresholdBuyRule::default();
        rule.enabled = true;
        rule.trigger_price = dec!(0.35);
        rule.round_size = true;
        store.set_threshold_buy(&outcome("Lakers"), rule.clone()).unwrap();

        let reloaded = RuleStore::load(path).unwrap();
        assert_eq!(reloaded.threshold_buy(&outcome("Lakers")), rule);
        // other kinds stay at defaults
        assert!(!reloaded.periodic_buy(&outcome("Lakers")).enabled);
    }

    #[test]
    fn test_file_schema_tolerates_missing_keys() {
        // A file written by an older build: one section, sparse fields.
        let json = r#"{
            "threshold_buy": {
                "Lakers": {"enabled": true, "trigger_price": "0.25"}
            }
        }"#;
        let file: RuleFile = serde_json::from_str(json).unwrap();
        let rule = file.threshold_buy.get(&outcome("Lakers")).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.trigger_price, dec!(0.25));
        // unspecified fields fall back to defaults
        assert_eq!(rule.budget, dec!(10));
        assert!(file.periodic_buy.is_empty());
    }

    #[test]
    fn test_ensure_defaults_creates_once() {
        let mut store = RuleStore::in_memory();
        assert!(store.ensure_defaults(&outcome("Lakers")).unwrap());
        assert!(!store.ensure_defaults(&outcome("Lakers")).unwrap());
        assert_eq!(store.outcomes().len(), 1);
        assert_eq!(store.all().len(), 3);
    }

    #[test]
    fn test_remove_outcome_drops_every_kind() {
        let mut store = RuleStore::in_memory();
        store.ensure_defaults(&outcome("Lakers")).unwrap();
        store.ensure_defaults(&outcome("Celtics")).unwrap();

        store.remove_outcome(&outcome("Lakers")).unwrap();
        assert_eq!(store.outcomes().len(), 1);
        assert!(store.outcomes().contains(&outcome("Celtics")));
    }

    #[test]
    fn test_reserve_then_release_restores_previous_stamp() {
        let mut store = RuleStore::in_memory();
        let o = outcome("Lakers");
        let earlier = Utc::now() - chrono::Duration::seconds(300);

        let mut rule = ThresholdBuyRule::default();
        rule.last_buy_at = Some(earlier);
        store.set_threshold_buy(&o, rule).unwrap();

        let now = Utc::now();
        let reservation = store.reserve(&o, RuleKind::ThresholdBuy, now);
        assert_eq!(store.threshold_buy(&o).last_buy_at, Some(now));

        store.release(reservation);
        assert_eq!(store.threshold_buy(&o).last_buy_at, Some(earlier));
    }

    #[test]
    fn test_reserve_then_commit_keeps_stamp_and_accumulates() {
        let mut store = RuleStore::in_memory();
        let o = outcome("Lakers");

        let now = Utc::now();
        let reservation = store.reserve(&o, RuleKind::PeriodicBuy, now);
        store.commit(reservation, dec!(25)).unwrap();

        let rule = store.periodic_buy(&o);
        assert_eq!(rule.last_buy_at, Some(now));
        assert_eq!(rule.buy_count, 1);
        assert_eq!(rule.total_spent, dec!(25));

        let later = now + chrono::Duration::seconds(30);
        let reservation = store.reserve(&o, RuleKind::PeriodicBuy, later);
        store.commit(reservation, dec!(15)).unwrap();
        let rule = store.periodic_buy(&o);
        assert_eq!(rule.buy_count, 2);
        assert_eq!(rule.total_spent, dec!(40));
    }

    #[test]
    fn test_disable_persists_in_place() {
        let mut store = RuleStore::in_memory();
        let o = outcome("Lakers");
        let mut rule = PeriodicBuyRule::default();
        rule.enabled = true;
        store.set_periodic_buy(&o, rule).unwrap();

        store.disable(&o, RuleKind::PeriodicBuy).unwrap();
        assert!(!store.periodic_buy(&o).enabled);
    }

    #[test]
    fn test_mutation_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let mut store = RuleStore::load(path.clone()).unwrap();

        store.ensure_defaults(&outcome("Lakers")).unwrap();
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("Lakers"));
    }
}
