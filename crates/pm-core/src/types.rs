//! Core domain types shared by the feed and trading crates.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order side for trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type accepted by the venue gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Good-till-cancelled limit order (gateway default).
    Gtc,
    /// Fill-or-kill.
    Fok,
    /// Immediate-or-cancel (partial fills ok, cancel rest).
    Ioc,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Gtc => write!(f, "GTC"),
            OrderType::Fok => write!(f, "FOK"),
            OrderType::Ioc => write!(f, "IOC"),
        }
    }
}

/// Error returned when an outcome label fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid outcome label: {0:?}")]
pub struct InvalidOutcome(pub String);

/// Validated outcome label for one side of a market.
///
/// Outcomes arrive as free-form strings from the venue (team names,
/// "Yes"/"No", ...); this newtype guarantees a trimmed, non-empty key so
/// rule and position lookups never disagree on whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutcomeId(String);

impl OutcomeId {
    /// Validate and normalize an outcome label.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, InvalidOutcome> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(InvalidOutcome(raw.as_ref().to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OutcomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single level in an order book (price + quantity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Price in USDC (0.00 to 1.00 for binary markets).
    pub price: Decimal,
    /// Quantity available at this price.
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Best-of-book snapshot for a single token.
///
/// Either side may be absent: a fresh market can have an empty book, and
/// incremental updates only touch the side they carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookTop {
    /// Token ID this top-of-book belongs to.
    pub token_id: String,
    /// Highest standing buy price.
    pub best_bid: Option<Decimal>,
    /// Lowest standing sell price.
    pub best_ask: Option<Decimal>,
    /// Size at the best bid, when known.
    pub bid_size: Option<Decimal>,
    /// Size at the best ask, when known.
    pub ask_size: Option<Decimal>,
    /// Timestamp of the event that last touched this entry.
    pub updated_at: DateTime<Utc>,
}

impl BookTop {
    pub fn new(token_id: String, updated_at: DateTime<Utc>) -> Self {
        Self {
            token_id,
            best_bid: None,
            best_ask: None,
            bid_size: None,
            ask_size: None,
            updated_at,
        }
    }

    /// True once both sides have been observed.
    pub fn is_two_sided(&self) -> bool {
        self.best_bid.is_some() && self.best_ask.is_some()
    }
}

/// Holdings on one outcome, as reported by the position gateway.
///
/// Replaced wholesale on each refresh cycle; never diffed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSide {
    /// Outcome label.
    pub outcome: String,
    /// Shares held.
    pub size: Decimal,
    /// Average entry price, when the gateway reports one.
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    /// Current market price, when the gateway reports one.
    #[serde(default)]
    pub cur_price: Option<Decimal>,
    /// Total cost basis.
    #[serde(default)]
    pub initial_value: Option<Decimal>,
}

/// Parse a millisecond-epoch timestamp string from the wire.
pub fn parse_timestamp_ms(ts: &str) -> Option<DateTime<Utc>> {
    ts.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
