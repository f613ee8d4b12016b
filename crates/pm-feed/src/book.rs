//! Best-of-book cache, updated from decoded feed events.
//!
//! Two event shapes normalize to the same internal update: a full `book`
//! snapshot, from which both tops are recomputed, and an incremental
//! `price_change`, which overwrites only the side(s) it carries.

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use pm_core::{parse_timestamp_ms, BookTop, PriceLevel};

use crate::wire::{BookMessage, FeedEvent, PriceChangeMessage, RawLevel};

/// In-memory mapping from token ID to its current best bid/ask.
///
/// Single-writer by convention (the engine task applies events in arrival
/// order); reads may come from anywhere.
#[derive(Debug, Default)]
pub struct MarketBookCache {
    books: DashMap<String, BookTop>,
}

impl MarketBookCache {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    /// Apply a feed event, returning the token IDs whose top changed.
    ///
    /// Events that carry no book data return an empty list.
    pub fn apply(&self, event: &FeedEvent) -> Vec<String> {
        match event {
            FeedEvent::Book(msg) => {
                self.apply_book(msg);
                vec![msg.asset_id.clone()]
            }
            FeedEvent::PriceChange(msg) => self.apply_price_change(msg),
            _ => Vec::new(),
        }
    }

    /// Apply a full snapshot: recompute both tops from the level lists.
    pub fn apply_book(&self, msg: &BookMessage) {
        let best_bid = best_of(&msg.bids, BookSide::Bid);
        let best_ask = best_of(&msg.asks, BookSide::Ask);
        let updated_at = parse_timestamp_ms(&msg.timestamp).unwrap_or_else(Utc::now);

        let mut entry = self
            .books
            .entry(msg.asset_id.clone())
            .or_insert_with(|| BookTop::new(msg.asset_id.clone(), updated_at));
        entry.best_bid = best_bid.map(|l| l.price);
        entry.bid_size = best_bid.map(|l| l.size);
        entry.best_ask = best_ask.map(|l| l.price);
        entry.ask_size = best_ask.map(|l| l.size);
        entry.updated_at = updated_at;
    }

    /// Apply incremental best-price deltas.
    ///
    /// Only the side(s) present in each entry are overwritten; the
    /// untouched side keeps its previous value. Entries with no parseable
    /// top are dropped.
    pub fn apply_price_change(&self, msg: &PriceChangeMessage) -> Vec<String> {
        let updated_at = parse_timestamp_ms(&msg.timestamp).unwrap_or_else(Utc::now);
        let mut touched = Vec::new();

        for change in &msg.price_changes {
            let bid = change.best_bid.as_deref().and_then(parse_price);
            let ask = change.best_ask.as_deref().and_then(parse_price);
            if bid.is_none() && ask.is_none() {
                debug!(token = %change.asset_id, "price_change without usable top, dropped");
                continue;
            }

            let mut entry = self
                .books
                .entry(change.asset_id.clone())
                .or_insert_with(|| BookTop::new(change.asset_id.clone(), updated_at));
            if bid.is_some() {
                entry.best_bid = bid;
            }
            if ask.is_some() {
                entry.best_ask = ask;
            }
            entry.updated_at = updated_at;
            touched.push(change.asset_id.clone());
        }

        touched
    }

    /// Current top-of-book for a token, if any price event has been seen.
    pub fn top(&self, token_id: &str) -> Option<BookTop> {
        self.books.get(token_id).map(|r| r.clone())
    }

    /// Number of tokens with a cached top.
    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

enum BookSide {
    Bid,
    Ask,
}

/// Best level of one side: maximum price for bids, minimum for asks.
fn best_of(levels: &[RawLevel], side: BookSide) -> Option<PriceLevel> {
    let mut best: Option<PriceLevel> = None;
    for level in levels {
        let (Ok(price), Ok(size)) = (level.price.parse::<Decimal>(), level.size.parse::<Decimal>())
        else {
            continue;
        };
        let better = match (&best, &side) {
            (None, _) => true,
            (Some(b), BookSide::Bid) => price > b.price,
            (Some(b), BookSide::Ask) => price < b.price,
        };
        if better {
            best = Some(PriceLevel::new(price, size));
        }
    }
    best
}

fn parse_price(raw: &str) -> Option<Decimal> {
    raw.parse::<Decimal>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::PriceChange;
    use rust_decimal_macros::dec;

    fn book_msg(token: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> BookMessage {
        BookMessage {
            event_type: "book".to_string(),
            asset_id: token.to_string(),
            market: "cond1".to_string(),
            timestamp: "1704067200000".to_string(),
            hash: None,
            bids: bids
                .iter()
                .map(|(p, s)| RawLevel {
                    price: p.to_string(),
                    size: s.to_string(),
                })
                .collect(),
            asks: asks
                .iter()
                .map(|(p, s)| RawLevel {
                    price: p.to_string(),
                    size: s.to_string(),
                })
                .collect(),
        }
    }

    fn change_msg(token: &str, best_bid: Option<&str>, best_ask: Option<&str>) -> PriceChangeMessage {
        PriceChangeMessage {
            event_type: "price_change".to_string(),
            asset_id: token.to_string(),
            market: "cond1".to_string(),
            timestamp: "1704067260000".to_string(),
            price_changes: vec![PriceChange {
                asset_id: token.to_string(),
                price: "0.50".to_string(),
                size: "10".to_string(),
                side: "buy".to_string(),
                best_bid: best_bid.map(String::from),
                best_ask: best_ask.map(String::from),
            }],
        }
    }

    #[test]
    fn test_full_book_picks_extremes() {
        let cache = MarketBookCache::new();
        cache.apply_book(&book_msg(
            "t1",
            &[("0.44", "200"), ("0.45", "100"), ("0.40", "50")],
            &[("0.56", "250"), ("0.55", "150"), ("0.60", "75")],
        ));

        let top = cache.top("t1").unwrap();
        assert_eq!(top.best_bid, Some(dec!(0.45)));
        assert_eq!(top.bid_size, Some(dec!(100)));
        assert_eq!(top.best_ask, Some(dec!(0.55)));
        assert_eq!(top.ask_size, Some(dec!(150)));
    }

    #[test]
    fn test_full_book_replaces_previous() {
        let cache = MarketBookCache::new();
        cache.apply_book(&book_msg("t1", &[("0.45", "100")], &[("0.55", "150")]));
        cache.apply_book(&book_msg("t1", &[("0.30", "10")], &[]));

        let top = cache.top("t1").unwrap();
        assert_eq!(top.best_bid, Some(dec!(0.30)));
        // snapshot with no asks clears the ask side
        assert_eq!(top.best_ask, None);
    }

    #[test]
    fn test_delta_overwrites_only_present_side() {
        let cache = MarketBookCache::new();
        cache.apply_book(&book_msg("t1", &[("0.45", "100")], &[("0.55", "150")]));

        let touched = cache.apply_price_change(&change_msg("t1", Some("0.47"), None));
        assert_eq!(touched, vec!["t1".to_string()]);

        let top = cache.top("t1").unwrap();
        assert_eq!(top.best_bid, Some(dec!(0.47)));
        // untouched side retains its prior value
        assert_eq!(top.best_ask, Some(dec!(0.55)));
    }

    #[test]
    fn test_delta_creates_entry_for_unseen_token() {
        let cache = MarketBookCache::new();
        let touched = cache.apply_price_change(&change_msg("fresh", None, Some("0.62")));
        assert_eq!(touched.len(), 1);

        let top = cache.top("fresh").unwrap();
        assert_eq!(top.best_ask, Some(dec!(0.62)));
        assert_eq!(top.best_bid, None);
    }

    #[test]
    fn test_delta_without_tops_is_dropped() {
        let cache = MarketBookCache::new();
        let touched = cache.apply_price_change(&change_msg("t1", None, None));
        assert!(touched.is_empty());
        assert!(cache.top("t1").is_none());
    }

    #[test]
    fn test_malformed_levels_skipped() {
        let cache = MarketBookCache::new();
        cache.apply_book(&book_msg(
            "t1",
            &[("garbage", "100"), ("0.42", "80")],
            &[("0.58", "oops"), ("0.59", "40")],
        ));

        let top = cache.top("t1").unwrap();
        assert_eq!(top.best_bid, Some(dec!(0.42)));
        assert_eq!(top.best_ask, Some(dec!(0.59)));
    }

    #[test]
    fn test_apply_dispatches_by_event() {
        let cache = MarketBookCache::new();
        let touched = cache.apply(&FeedEvent::Book(book_msg(
            "t1",
            &[("0.45", "100")],
            &[("0.55", "150")],
        )));
        assert_eq!(touched, vec!["t1".to_string()]);
        assert_eq!(cache.len(), 1);

        let touched = cache.apply(&FeedEvent::Heartbeat(Utc::now()));
        assert!(touched.is_empty());
    }
}
