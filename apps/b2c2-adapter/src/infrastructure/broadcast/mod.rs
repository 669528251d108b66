//! Broadcast Channel Adapters
//!
//! Implements the publication sinks using tokio broadcast channels for
//! efficient fan-out to multiple in-process subscribers.
//!
//! # Architecture
//!
//! The `BroadcastHub` provides one channel per published type:
//! - Normalized order books
//! - Derived tick prices
//!
//! Each channel supports multiple receivers with configurable capacity.
//! The sink adapters treat "no receivers attached" as success: the hub is
//! at-least-once towards whoever is listening, and slow receivers see
//! lagged errors on their own side.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::ports::{OrderBookSink, SinkError, TickPriceSink};
use crate::domain::orderbook::{OrderBook, TickPrice};
use crate::infrastructure::metrics;

// =============================================================================
// Broadcast Messages
// =============================================================================

/// Order book broadcast message.
#[derive(Debug, Clone)]
pub struct OrderBookBroadcast {
    /// The normalized order book.
    pub book: OrderBook,
}

/// Tick price broadcast message.
#[derive(Debug, Clone)]
pub struct TickPriceBroadcast {
    /// The derived tick price.
    pub tick: TickPrice,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity for the order-book channel.
    pub order_books_capacity: usize,
    /// Capacity for the tick-price channel.
    pub tick_prices_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            order_books_capacity: 10_000,
            tick_prices_capacity: 10_000,
        }
    }
}

/// Central hub for all broadcast channels.
///
/// # Example
///
/// ```rust
/// use b2c2_adapter::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
///
/// // Get a receiver for order books
/// let mut rx = hub.order_books_rx();
///
/// // In another task, publish books
/// // hub.send_order_book(book);
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    order_books_tx: broadcast::Sender<OrderBookBroadcast>,
    tick_prices_tx: broadcast::Sender<TickPriceBroadcast>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            order_books_tx: broadcast::channel(config.order_books_capacity).0,
            tick_prices_tx: broadcast::channel(config.tick_prices_capacity).0,
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Order Book Channel
    // =========================================================================

    /// Send an order book to all subscribers.
    ///
    /// Returns the number of receivers that received the message, or
    /// `None` if there are no active receivers.
    #[must_use]
    pub fn send_order_book(&self, book: OrderBook) -> Option<usize> {
        self.order_books_tx.send(OrderBookBroadcast { book }).ok()
    }

    /// Get a new receiver for order books.
    #[must_use]
    pub fn order_books_rx(&self) -> broadcast::Receiver<OrderBookBroadcast> {
        self.order_books_tx.subscribe()
    }

    /// Get the number of active order-book receivers.
    #[must_use]
    pub fn order_books_receiver_count(&self) -> usize {
        self.order_books_tx.receiver_count()
    }

    // =========================================================================
    // Tick Price Channel
    // =========================================================================

    /// Send a tick price to all subscribers.
    #[must_use]
    pub fn send_tick_price(&self, tick: TickPrice) -> Option<usize> {
        self.tick_prices_tx.send(TickPriceBroadcast { tick }).ok()
    }

    /// Get a new receiver for tick prices.
    #[must_use]
    pub fn tick_prices_rx(&self) -> broadcast::Receiver<TickPriceBroadcast> {
        self.tick_prices_tx.subscribe()
    }

    /// Get the number of active tick-price receivers.
    #[must_use]
    pub fn tick_prices_receiver_count(&self) -> usize {
        self.tick_prices_tx.receiver_count()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            order_books_receivers: self.order_books_receiver_count(),
            tick_prices_receivers: self.tick_prices_receiver_count(),
        }
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    /// Number of order-book receivers.
    pub order_books_receivers: usize,
    /// Number of tick-price receivers.
    pub tick_prices_receivers: usize,
}

impl BroadcastStats {
    /// Get total number of receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.order_books_receivers + self.tick_prices_receivers
    }
}

// =============================================================================
// Sink Adapters
// =============================================================================

/// Order-book sink backed by the broadcast hub.
#[derive(Debug, Clone)]
pub struct BroadcastOrderBookSink {
    hub: SharedBroadcastHub,
}

impl BroadcastOrderBookSink {
    /// Create a sink publishing into the given hub.
    #[must_use]
    pub fn new(hub: SharedBroadcastHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl OrderBookSink for BroadcastOrderBookSink {
    async fn publish(&self, book: &OrderBook) -> Result<(), SinkError> {
        let _ = self.hub.send_order_book(book.clone());
        metrics::record_order_book_published();
        Ok(())
    }
}

/// Tick-price sink backed by the broadcast hub.
#[derive(Debug, Clone)]
pub struct BroadcastTickPriceSink {
    hub: SharedBroadcastHub,
}

impl BroadcastTickPriceSink {
    /// Create a sink publishing into the given hub.
    #[must_use]
    pub fn new(hub: SharedBroadcastHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl TickPriceSink for BroadcastTickPriceSink {
    async fn publish(&self, tick: &TickPrice) -> Result<(), SinkError> {
        let _ = self.hub.send_tick_price(tick.clone());
        metrics::record_tick_price_published();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::orderbook::BookLevel;

    fn make_test_book(instrument: &str) -> OrderBook {
        OrderBook {
            source: "b2c2".to_string(),
            instrument: instrument.to_string(),
            timestamp: Utc::now(),
            asks: vec![BookLevel::new(Decimal::from(101), Decimal::from(1))],
            bids: vec![BookLevel::new(Decimal::from(100), Decimal::from(2))],
        }
    }

    #[test]
    fn broadcast_hub_creation() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.order_books_receiver_count(), 0);
        assert_eq!(hub.tick_prices_receiver_count(), 0);
    }

    #[test]
    fn receiver_count_tracks_subscriptions() {
        let hub = BroadcastHub::with_defaults();

        let _rx1 = hub.order_books_rx();
        assert_eq!(hub.order_books_receiver_count(), 1);

        {
            let _rx2 = hub.order_books_rx();
            assert_eq!(hub.order_books_receiver_count(), 2);
        }

        assert_eq!(hub.order_books_receiver_count(), 1);
    }

    #[tokio::test]
    async fn send_and_receive_order_book() {
        let hub = BroadcastHub::with_defaults();
        let mut rx = hub.order_books_rx();

        let sent = hub.send_order_book(make_test_book("BTCUSD"));
        assert_eq!(sent, Some(1));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.book.instrument, "BTCUSD");
    }

    #[test]
    fn send_with_no_receivers_returns_none() {
        let hub = BroadcastHub::with_defaults();
        assert!(hub.send_order_book(make_test_book("BTCUSD")).is_none());
    }

    #[tokio::test]
    async fn sink_publishes_into_hub() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let sink = BroadcastOrderBookSink::new(Arc::clone(&hub));
        let mut rx = hub.order_books_rx();

        sink.publish(&make_test_book("ETHUSD")).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.book.instrument, "ETHUSD");
    }

    #[tokio::test]
    async fn sink_without_receivers_still_succeeds() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let sink = BroadcastOrderBookSink::new(hub);

        assert!(sink.publish(&make_test_book("BTCUSD")).await.is_ok());
    }

    #[tokio::test]
    async fn tick_sink_publishes_into_hub() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let sink = BroadcastTickPriceSink::new(Arc::clone(&hub));
        let mut rx = hub.tick_prices_rx();

        let book = make_test_book("BTCUSD");
        let tick = TickPrice::from_book(&book).unwrap();
        sink.publish(&tick).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.tick.instrument, "BTCUSD");
        assert_eq!(received.tick.bid, Decimal::from(100));
    }

    #[test]
    fn stats_reflect_all_channels() {
        let hub = BroadcastHub::with_defaults();

        let _rx1 = hub.order_books_rx();
        let _rx2 = hub.tick_prices_rx();

        let stats = hub.stats();
        assert_eq!(stats.order_books_receivers, 1);
        assert_eq!(stats.tick_prices_receivers, 1);
        assert_eq!(stats.total_receivers(), 2);
    }
}
