//! Message shapes on the market WebSocket channel.
//!
//! The venue pushes named events discriminated by `event_type`. Prices and
//! sizes arrive as decimal strings and are parsed at the cache boundary,
//! not here, so a single malformed level never poisons a whole frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Initial subscription message for the market channel.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub channel: &'static str,
}

impl SubscribeMessage {
    /// Subscribe to market data for the given token IDs.
    pub fn market(asset_ids: &[String]) -> Self {
        Self {
            assets_ids: asset_ids.to_vec(),
            channel: "market",
        }
    }
}

/// Incremental subscription change on an established connection.
#[derive(Debug, Serialize)]
pub struct SubscriptionOp {
    pub assets_ids: Vec<String>,
    pub operation: &'static str,
}

/// One raw order-book level (decimal strings as sent by the venue).
#[derive(Debug, Clone, Deserialize)]
pub struct RawLevel {
    pub price: String,
    pub size: String,
}

/// Full order-book snapshot for one token.
#[derive(Debug, Clone, Deserialize)]
pub struct BookMessage {
    pub event_type: String,
    pub asset_id: String,
    pub market: String,
    pub timestamp: String,
    #[serde(default)]
    pub hash: Option<String>,
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
}

/// One entry in a `price_change` message.
///
/// `best_bid`/`best_ask` carry the already-computed tops when present;
/// a side that is absent was not touched by this update.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChange {
    pub asset_id: String,
    pub price: String,
    pub size: String,
    pub side: String,
    #[serde(default)]
    pub best_bid: Option<String>,
    #[serde(default)]
    pub best_ask: Option<String>,
}

/// Incremental best-price update message.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeMessage {
    pub event_type: String,
    pub asset_id: String,
    pub market: String,
    pub timestamp: String,
    pub price_changes: Vec<PriceChange>,
}

/// One tradable token inside a market-metadata event.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenMeta {
    pub token_id: String,
    pub outcome: String,
}

/// Instrument list for the monitored event.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketMetadataMessage {
    pub event_type: String,
    pub market: String,
    pub tokens: Vec<TokenMeta>,
}

/// The monitored event has ended; its instruments are no longer tradable.
#[derive(Debug, Clone, Deserialize)]
pub struct GameEndMessage {
    pub event_type: String,
    pub market: String,
}

/// Minimal probe used to discriminate frames before full decoding.
#[derive(Debug, Deserialize)]
struct GenericMessage {
    event_type: Option<String>,
}

/// A decoded event from the market feed.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Full order-book snapshot.
    Book(BookMessage),
    /// Incremental best-price delta.
    PriceChange(PriceChangeMessage),
    /// Instrument list for the monitored event.
    MarketMetadata(MarketMetadataMessage),
    /// Monitored event ended.
    GameEnd(GameEndMessage),
    /// Keep-alive marker with no payload significance beyond liveness.
    Heartbeat(DateTime<Utc>),
}

impl FeedEvent {
    /// Returns true if this event is a bare keep-alive.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, FeedEvent::Heartbeat(_))
    }
}

/// Decode one text frame into zero or more feed events.
///
/// The venue batches the initial books for a subscription into a JSON
/// array; bare `PING`/`PONG` text frames count as heartbeats. Frames that
/// decode to nothing actionable are dropped with a debug log, never an
/// error.
pub fn decode_frame(text: &str) -> Vec<FeedEvent> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return vec![FeedEvent::Heartbeat(Utc::now())];
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            debug!("dropping unparseable frame: {e}");
            return Vec::new();
        }
    };

    match value {
        serde_json::Value::Array(items) => {
            items.iter().filter_map(decode_value).collect()
        }
        obj @ serde_json::Value::Object(_) => decode_value(&obj).into_iter().collect(),
        other => {
            debug!("dropping non-object frame: {other}");
            Vec::new()
        }
    }
}

fn decode_value(value: &serde_json::Value) -> Option<FeedEvent> {
    let probe: GenericMessage = match serde_json::from_value(value.clone()) {
        Ok(p) => p,
        Err(e) => {
            debug!("dropping malformed event: {e}");
            return None;
        }
    };

    let event_type = probe.event_type.as_deref()?;
    let decoded = match event_type {
        "book" => serde_json::from_value(value.clone()).map(FeedEvent::Book),
        "price_change" => serde_json::from_value(value.clone()).map(FeedEvent::PriceChange),
        "market_metadata" => serde_json::from_value(value.clone()).map(FeedEvent::MarketMetadata),
        "game_end" => serde_json::from_value(value.clone()).map(FeedEvent::GameEnd),
        other => {
            // e.g. last_trade_price, tick_size_change
            debug!("ignoring event_type {other}");
            return None;
        }
    };

    match decoded {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("dropping malformed {event_type} event: {e}");
            None
        }
    }
}
