//! Autonomous order-execution engine for one monitored market.
//!
//! Consumes the feed maintained by `pm-feed`, evaluates per-instrument
//! trading rules against the freshest book and position data, and submits
//! orders through the trading gateway exactly once per qualifying
//! condition.
//!
//! ## Modules
//!
//! - `config`: TOML configuration with env overrides
//! - `gateway`: outbound REST contracts (orders, positions, constraints)
//! - `rules`: durable per-outcome rule store with two-phase cooldown stamps
//! - `gate`: pre-submission eligibility checks and single-flight guards
//! - `positions`: best-effort, replace-based position cache
//! - `engine`: the three conditional rules and their evaluation loop
//! - `submit`: one-shot order submission and per-outcome statistics
//! - `notice`: operator-facing notifications

pub mod config;
pub mod engine;
pub mod gate;
pub mod gateway;
pub mod notice;
pub mod positions;
pub mod rules;
pub mod submit;

pub use config::BotConfig;
pub use engine::{EngineConfig, RuleEngine};
pub use gate::{Credentials, GateRejection, InFlightFlag, OrderGate};
pub use gateway::{GatewayError, HttpGateway, OrderAck, OrderRequest, TradingGateway};
pub use notice::Notice;
pub use positions::PositionCache;
pub use rules::{RuleKind, RuleStore};
pub use submit::{OrderStatsBook, OrderSubmitter};
