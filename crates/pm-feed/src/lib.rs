//! Resilient streaming client for the market event feed.
//!
//! Maintains one logical subscription to the venue's server-pushed market
//! channel with automatic reconnection, exponential backoff, and
//! heartbeat-loss detection, and keeps a best-of-book cache current from
//! the decoded events.
//!
//! ## Modules
//!
//! - `wire`: message shapes on the WebSocket channel and frame decoding
//! - `book`: in-memory best bid/ask cache per token
//! - `backoff`: pure reconnect-delay policy
//! - `session`: the connection state machine, run as an owned task

pub mod backoff;
pub mod book;
pub mod session;
pub mod wire;

pub use backoff::BackoffPolicy;
pub use book::MarketBookCache;
pub use session::{
    ConnectionState, ConnectionStatus, SessionConfig, SessionHandle, SubscriptionParams,
};
pub use wire::{decode_frame, BookMessage, FeedEvent, MarketMetadataMessage, PriceChangeMessage};
