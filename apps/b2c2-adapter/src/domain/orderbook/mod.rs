//! Order Book Types and Caches
//!
//! Normalized order-book representation derived from B2C2 price updates,
//! the best-bid/ask tick price for lightweight consumers, and the two
//! last-write-wins caches backing the synchronous query surface.
//!
//! # Side Inversion
//!
//! B2C2 labels its price ladders from the *taker's* perspective: the
//! `sell` ladder is the set of prices the client can sell at (the venue's
//! bids) and the `buy` ladder is what the client can buy at (the venue's
//! asks). Conversion therefore maps `sell` → bids and `buy` → asks. This
//! is a property of the upstream protocol's naming and must be preserved
//! exactly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// One tier of a price ladder: a (price, quantity) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Tier price.
    pub price: Decimal,
    /// Quantity available at this price.
    pub quantity: Decimal,
}

impl BookLevel {
    /// Create a new level.
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// A decoded price update for one instrument, as received on the wire.
///
/// Ladders are ordered best-first by the exchange. The instrument is in
/// wire form; resolution to the canonical name happens during conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Wire instrument name (e.g. `"BTCUSD.SPOT"`).
    pub instrument: String,
    /// Event timestamp reported by the exchange.
    pub timestamp: DateTime<Utc>,
    /// Ladder of prices the client can buy at.
    pub buy: Vec<BookLevel>,
    /// Ladder of prices the client can sell at.
    pub sell: Vec<BookLevel>,
}

/// A normalized order book for one canonical instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Originating venue identifier.
    pub source: String,
    /// Canonical instrument name (e.g. `"BTCUSD"`).
    pub instrument: String,
    /// Timestamp carried over from the price update.
    pub timestamp: DateTime<Utc>,
    /// Ask tiers, best (lowest) first.
    pub asks: Vec<BookLevel>,
    /// Bid tiers, best (highest) first.
    pub bids: Vec<BookLevel>,
}

impl OrderBook {
    /// Convert a price update into a normalized order book.
    ///
    /// The update's `sell` ladder becomes the bids and its `buy` ladder
    /// becomes the asks (see module docs).
    #[must_use]
    pub fn from_update(source: &str, canonical_instrument: &str, update: &PriceUpdate) -> Self {
        Self {
            source: source.to_string(),
            instrument: canonical_instrument.to_string(),
            timestamp: update.timestamp,
            asks: update.buy.clone(),
            bids: update.sell.clone(),
        }
    }

    /// Best bid tier, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    /// Best ask tier, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }
}

/// Best bid and ask derived from an order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickPrice {
    /// Canonical instrument name.
    pub instrument: String,
    /// Timestamp carried over from the order book.
    pub timestamp: DateTime<Utc>,
    /// Best bid price.
    pub bid: Decimal,
    /// Quantity at the best bid.
    pub bid_quantity: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Quantity at the best ask.
    pub ask_quantity: Decimal,
}

impl TickPrice {
    /// Derive the tick price from an order book.
    ///
    /// Returns `None` when either side of the book is empty.
    #[must_use]
    pub fn from_book(book: &OrderBook) -> Option<Self> {
        let bid = book.best_bid()?;
        let ask = book.best_ask()?;

        Some(Self {
            instrument: book.instrument.clone(),
            timestamp: book.timestamp,
            bid: bid.price,
            bid_quantity: bid.quantity,
            ask: ask.price,
            ask_quantity: ask.quantity,
        })
    }
}

// =============================================================================
// Caches
// =============================================================================

/// Latest raw price update per wire instrument.
///
/// Last-write-wins; readers tolerate staleness, so a plain `RwLock` over
/// whole-value replacement per key is sufficient.
#[derive(Debug, Default)]
pub struct PriceUpdateCache {
    entries: RwLock<HashMap<String, PriceUpdate>>,
}

impl PriceUpdateCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest update for its wire instrument, overwriting.
    pub fn store(&self, update: PriceUpdate) {
        self.entries
            .write()
            .insert(update.instrument.clone(), update);
    }

    /// Latest update for a wire instrument.
    #[must_use]
    pub fn get(&self, wire_instrument: &str) -> Option<PriceUpdate> {
        self.entries.read().get(wire_instrument).cloned()
    }

    /// Number of cached instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Latest normalized order book per canonical instrument.
#[derive(Debug, Default)]
pub struct OrderBookCache {
    entries: RwLock<HashMap<String, OrderBook>>,
}

impl OrderBookCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest book for its canonical instrument, overwriting.
    pub fn store(&self, book: OrderBook) {
        self.entries.write().insert(book.instrument.clone(), book);
    }

    /// Latest book for a canonical instrument.
    #[must_use]
    pub fn get(&self, canonical_instrument: &str) -> Option<OrderBook> {
        self.entries.read().get(canonical_instrument).cloned()
    }

    /// Snapshot of all cached books, unordered.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OrderBook> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of cached books.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
