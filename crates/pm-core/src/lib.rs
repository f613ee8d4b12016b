//! Shared domain types for the prediction-market agent.
//!
//! CRITICAL: all prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod types;

pub use types::{
    parse_timestamp_ms, BookTop, InvalidOutcome, OrderType, OutcomeId, PositionSide, PriceLevel,
    Side,
};
