//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`OrderBookAggregator`]: consumes dispatched price updates, converts
//!   them to normalized order books, publishes, and maintains the caches
//! - [`MarketDataService`]: startup sequence, subscribe/unsubscribe with
//!   naming resolution, and the synchronous query surface

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::application::ports::{
    InstrumentSource, InstrumentSourceError, OrderBookSink, SubscribeError, SubscriptionGateway,
    TickPriceSink, UnsubscribeError,
};
use crate::domain::instruments::InstrumentMap;
use crate::domain::orderbook::{
    OrderBook, OrderBookCache, PriceUpdate, PriceUpdateCache, TickPrice,
};
use crate::domain::subscription::{HandlerError, InstrumentSubscription, Levels, PriceHandler};

/// Source identifier stamped on every published order book.
pub const SOURCE: &str = "b2c2";

// =============================================================================
// Order Book Aggregator
// =============================================================================

/// Aggregation failure for a dispatched price update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// The update's wire instrument is missing from the naming map.
    #[error("no canonical mapping for wire instrument {0}")]
    UnmappedInstrument(String),
}

/// Consumes dispatched price updates and fans them out.
///
/// For each update, in order: store the raw update, convert to a
/// normalized order book, publish the book (awaited), store the book in
/// the cache, then derive and publish the tick price.
///
/// The book is cached *after* the publish attempt, so a reader may
/// briefly see the previous value while a publish is in flight; this is
/// an accepted staleness window. A sink failure propagates to the caller
/// and leaves the book cache on its previous value; there is no internal
/// retry.
pub struct OrderBookAggregator {
    instruments: Arc<InstrumentMap>,
    raw_cache: PriceUpdateCache,
    book_cache: OrderBookCache,
    book_sink: Arc<dyn OrderBookSink>,
    tick_sink: Arc<dyn TickPriceSink>,
}

impl OrderBookAggregator {
    /// Create a new aggregator.
    #[must_use]
    pub fn new(
        instruments: Arc<InstrumentMap>,
        book_sink: Arc<dyn OrderBookSink>,
        tick_sink: Arc<dyn TickPriceSink>,
    ) -> Self {
        Self {
            instruments,
            raw_cache: PriceUpdateCache::new(),
            book_cache: OrderBookCache::new(),
            book_sink,
            tick_sink,
        }
    }

    /// Latest raw update for a wire instrument.
    #[must_use]
    pub fn latest_price_update(&self, wire_instrument: &str) -> Option<PriceUpdate> {
        self.raw_cache.get(wire_instrument)
    }

    /// Latest normalized book for a canonical instrument.
    #[must_use]
    pub fn order_book(&self, canonical_instrument: &str) -> Option<OrderBook> {
        self.book_cache.get(canonical_instrument)
    }

    /// Tick prices derived from every cached book.
    #[must_use]
    pub fn tick_prices(&self) -> Vec<TickPrice> {
        self.book_cache
            .snapshot()
            .iter()
            .filter_map(TickPrice::from_book)
            .collect()
    }

    /// Number of cached order books.
    #[must_use]
    pub fn cached_book_count(&self) -> usize {
        self.book_cache.len()
    }
}

#[async_trait]
impl PriceHandler for OrderBookAggregator {
    async fn on_price_update(&self, update: PriceUpdate) -> Result<(), HandlerError> {
        self.raw_cache.store(update.clone());

        let canonical = self
            .instruments
            .canonical_for(&update.instrument)
            .ok_or_else(|| AggregationError::UnmappedInstrument(update.instrument.clone()))?
            .to_string();

        let book = OrderBook::from_update(SOURCE, &canonical, &update);

        self.book_sink.publish(&book).await?;
        self.book_cache.store(book.clone());

        if let Some(tick) = TickPrice::from_book(&book) {
            self.tick_sink.publish(&tick).await?;
        } else {
            tracing::debug!(
                instrument = %canonical,
                "Book has an empty side; skipping tick price"
            );
        }

        Ok(())
    }
}

// =============================================================================
// Market Data Service
// =============================================================================

/// Failure of the one-time startup sequence.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The tradable-instrument list could not be fetched or decoded.
    #[error(transparent)]
    Instruments(#[from] InstrumentSourceError),
    /// `start()` was called twice.
    #[error("service already started")]
    AlreadyStarted,
}

/// What the startup sequence achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupSummary {
    /// Instruments subscribed successfully.
    pub subscribed: usize,
    /// Configured instruments skipped after a per-instrument failure.
    pub skipped: usize,
}

struct ServiceState {
    instruments: Arc<InstrumentMap>,
    aggregator: Arc<OrderBookAggregator>,
}

/// The adapter's market-data facade.
///
/// Owns the startup sequence and exposes subscribe/unsubscribe with
/// canonical-name resolution plus the synchronous query surface backed by
/// the aggregator's caches.
pub struct MarketDataService {
    instrument_source: Arc<dyn InstrumentSource>,
    gateway: Arc<dyn SubscriptionGateway>,
    book_sink: Arc<dyn OrderBookSink>,
    tick_sink: Arc<dyn TickPriceSink>,
    configured: Vec<InstrumentSubscription>,
    state: OnceLock<ServiceState>,
}

impl MarketDataService {
    /// Create a new service.
    #[must_use]
    pub fn new(
        instrument_source: Arc<dyn InstrumentSource>,
        gateway: Arc<dyn SubscriptionGateway>,
        book_sink: Arc<dyn OrderBookSink>,
        tick_sink: Arc<dyn TickPriceSink>,
        configured: Vec<InstrumentSubscription>,
    ) -> Self {
        Self {
            instrument_source,
            gateway,
            book_sink,
            tick_sink,
            configured,
            state: OnceLock::new(),
        }
    }

    /// Run the one-time startup sequence.
    ///
    /// Fetches the tradable-instrument list (fatal on failure), builds
    /// the immutable naming map, then attempts each configured
    /// subscription. A per-instrument failure (unknown instrument,
    /// protocol rejection, timeout) is logged and skipped; partial
    /// startup success is acceptable.
    ///
    /// # Errors
    ///
    /// Returns `StartupError` if the instrument list cannot be fetched or
    /// the service was already started.
    pub async fn start(&self) -> Result<StartupSummary, StartupError> {
        let wire_names = self.instrument_source.tradable_instruments().await?;
        let instruments = Arc::new(InstrumentMap::build(&wire_names));
        tracing::info!(instruments = instruments.len(), "Built instrument naming map");

        let aggregator = Arc::new(OrderBookAggregator::new(
            Arc::clone(&instruments),
            Arc::clone(&self.book_sink),
            Arc::clone(&self.tick_sink),
        ));

        let state = ServiceState {
            instruments: Arc::clone(&instruments),
            aggregator: Arc::clone(&aggregator),
        };
        if self.state.set(state).is_err() {
            return Err(StartupError::AlreadyStarted);
        }

        let mut summary = StartupSummary::default();
        for subscription in &self.configured {
            let canonical = subscription.instrument.as_str();

            let Some(wire) = instruments.wire_for(canonical) else {
                tracing::warn!(
                    instrument = canonical,
                    "Unknown instrument; skipping subscription"
                );
                summary.skipped += 1;
                continue;
            };

            let handler: Arc<dyn PriceHandler> = Arc::clone(&aggregator) as _;
            match self
                .gateway
                .subscribe(wire, subscription.levels.clone(), handler)
                .await
            {
                Ok(()) => {
                    tracing::info!(instrument = canonical, "Subscribed");
                    summary.subscribed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        instrument = canonical,
                        error = %e,
                        "Subscription failed; skipping"
                    );
                    summary.skipped += 1;
                }
            }
        }

        tracing::info!(
            subscribed = summary.subscribed,
            skipped = summary.skipped,
            "Startup sequence finished"
        );
        Ok(summary)
    }

    /// Subscribe to one instrument by canonical name.
    ///
    /// # Errors
    ///
    /// Fails before any network action on an unknown instrument or when
    /// the service has not started; otherwise forwards the protocol
    /// outcome.
    pub async fn subscribe(&self, canonical: &str, levels: Levels) -> Result<(), SubscribeError> {
        let Some(state) = self.state.get() else {
            return Err(SubscribeError::SessionClosed);
        };
        let Some(wire) = state.instruments.wire_for(canonical) else {
            return Err(SubscribeError::UnknownInstrument(canonical.to_string()));
        };

        let handler: Arc<dyn PriceHandler> = Arc::clone(&state.aggregator) as _;
        self.gateway.subscribe(wire, levels, handler).await
    }

    /// Unsubscribe from one instrument by canonical name.
    ///
    /// On rejection or timeout the previous subscription stays installed
    /// and keeps receiving updates; the failure is reported to the
    /// caller.
    ///
    /// # Errors
    ///
    /// Fails on an unknown instrument, when the service has not started,
    /// or with the protocol outcome.
    pub async fn unsubscribe(&self, canonical: &str) -> Result<(), UnsubscribeError> {
        let Some(state) = self.state.get() else {
            return Err(UnsubscribeError::SessionClosed);
        };
        let Some(wire) = state.instruments.wire_for(canonical) else {
            return Err(UnsubscribeError::UnknownInstrument(canonical.to_string()));
        };

        self.gateway.unsubscribe(wire).await
    }

    // =========================================================================
    // Query Surface
    // =========================================================================

    /// Canonical names of all currently subscribed instruments, sorted.
    #[must_use]
    pub fn list_instruments(&self) -> Vec<String> {
        let Some(state) = self.state.get() else {
            return Vec::new();
        };

        let mut names: Vec<String> = self
            .gateway
            .active_instruments()
            .iter()
            .filter_map(|wire| state.instruments.canonical_for(wire))
            .map(ToString::to_string)
            .collect();
        names.sort();
        names
    }

    /// Tick prices derived from every cached order book.
    #[must_use]
    pub fn list_tick_prices(&self) -> Vec<TickPrice> {
        self.state
            .get()
            .map(|state| state.aggregator.tick_prices())
            .unwrap_or_default()
    }

    /// Latest order book for a canonical instrument, or `None` when
    /// nothing has been cached for it. Never a default/empty book.
    #[must_use]
    pub fn get_order_book(&self, canonical: &str) -> Option<OrderBook> {
        self.state.get()?.aggregator.order_book(canonical)
    }

    /// Latest raw price update for a wire instrument.
    #[must_use]
    pub fn latest_price_update(&self, wire: &str) -> Option<PriceUpdate> {
        self.state.get()?.aggregator.latest_price_update(wire)
    }

    /// Whether the streaming session is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.gateway.is_connected()
    }

    /// Number of instruments with an installed handler.
    #[must_use]
    pub fn active_subscription_count(&self) -> usize {
        self.gateway.active_instruments().len()
    }

    /// Number of cached order books.
    #[must_use]
    pub fn cached_book_count(&self) -> usize {
        self.state
            .get()
            .map_or(0, |state| state.aggregator.cached_book_count())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::SinkError;
    use crate::domain::orderbook::BookLevel;

    // -------------------------------------------------------------------------
    // Test doubles
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingBookSink {
        published: Mutex<Vec<OrderBook>>,
        fail: bool,
    }

    #[async_trait]
    impl OrderBookSink for RecordingBookSink {
        async fn publish(&self, book: &OrderBook) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Failed("sink down".to_string()));
            }
            self.published.lock().push(book.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingTickSink {
        published: Mutex<Vec<TickPrice>>,
    }

    #[async_trait]
    impl TickPriceSink for RecordingTickSink {
        async fn publish(&self, tick: &TickPrice) -> Result<(), SinkError> {
            self.published.lock().push(tick.clone());
            Ok(())
        }
    }

    struct FixedInstrumentSource {
        names: Vec<String>,
    }

    #[async_trait]
    impl InstrumentSource for FixedInstrumentSource {
        async fn tradable_instruments(&self) -> Result<Vec<String>, InstrumentSourceError> {
            Ok(self.names.clone())
        }
    }

    struct FailingInstrumentSource;

    #[async_trait]
    impl InstrumentSource for FailingInstrumentSource {
        async fn tradable_instruments(&self) -> Result<Vec<String>, InstrumentSourceError> {
            Err(InstrumentSourceError::Transport("boom".to_string()))
        }
    }

    /// Gateway that accepts everything and records installed handlers.
    #[derive(Default)]
    struct FakeGateway {
        active: Mutex<Vec<(String, Arc<dyn PriceHandler>)>>,
        reject: Option<String>,
    }

    #[async_trait]
    impl SubscriptionGateway for FakeGateway {
        async fn subscribe(
            &self,
            instrument: &str,
            _levels: Levels,
            handler: Arc<dyn PriceHandler>,
        ) -> Result<(), SubscribeError> {
            if self.reject.as_deref() == Some(instrument) {
                return Err(SubscribeError::Rejected { reason: None });
            }
            self.active
                .lock()
                .push((instrument.to_string(), handler));
            Ok(())
        }

        async fn unsubscribe(&self, _instrument: &str) -> Result<(), UnsubscribeError> {
            Err(UnsubscribeError::Rejected { reason: None })
        }

        fn active_instruments(&self) -> Vec<String> {
            self.active
                .lock()
                .iter()
                .map(|(name, _)| name.clone())
                .collect()
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn level(price: i64, quantity: i64) -> BookLevel {
        BookLevel::new(Decimal::from(price), Decimal::from(quantity))
    }

    fn update(instrument: &str, buy: Vec<BookLevel>, sell: Vec<BookLevel>) -> PriceUpdate {
        PriceUpdate {
            instrument: instrument.to_string(),
            timestamp: Utc::now(),
            buy,
            sell,
        }
    }

    fn subscription(instrument: &str, levels: Vec<u32>) -> InstrumentSubscription {
        InstrumentSubscription {
            instrument: instrument.to_string(),
            levels: Levels::new(levels).unwrap(),
        }
    }

    // -------------------------------------------------------------------------
    // Aggregator
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn aggregator_publishes_caches_and_derives_tick() {
        let map = Arc::new(InstrumentMap::build(["X.SPOT"]));
        let book_sink = Arc::new(RecordingBookSink::default());
        let tick_sink = Arc::new(RecordingTickSink::default());
        let aggregator = OrderBookAggregator::new(
            map,
            Arc::clone(&book_sink) as _,
            Arc::clone(&tick_sink) as _,
        );

        aggregator
            .on_price_update(update("X.SPOT", vec![level(99, 2)], vec![level(100, 1)]))
            .await
            .unwrap();

        // Raw cache keyed by wire name, book cache by canonical.
        assert!(aggregator.latest_price_update("X.SPOT").is_some());
        let book = aggregator.order_book("X").unwrap();
        assert_eq!(book.source, SOURCE);
        assert_eq!(book.bids, vec![level(100, 1)]);
        assert_eq!(book.asks, vec![level(99, 2)]);

        assert_eq!(book_sink.published.lock().len(), 1);
        let ticks = tick_sink.published.lock();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].bid, Decimal::from(100));
        assert_eq!(ticks[0].ask, Decimal::from(99));
    }

    #[tokio::test]
    async fn aggregator_sink_failure_propagates_and_skips_cache() {
        let map = Arc::new(InstrumentMap::build(["X.SPOT"]));
        let book_sink = Arc::new(RecordingBookSink {
            fail: true,
            ..Default::default()
        });
        let tick_sink = Arc::new(RecordingTickSink::default());
        let aggregator =
            OrderBookAggregator::new(map, Arc::clone(&book_sink) as _, tick_sink as _);

        let result = aggregator
            .on_price_update(update("X.SPOT", vec![level(99, 2)], vec![level(100, 1)]))
            .await;

        assert!(result.is_err());
        // Raw cache is written before the publish; the book cache is not.
        assert!(aggregator.latest_price_update("X.SPOT").is_some());
        assert!(aggregator.order_book("X").is_none());
    }

    #[tokio::test]
    async fn aggregator_rejects_unmapped_instrument() {
        let map = Arc::new(InstrumentMap::build(["X.SPOT"]));
        let aggregator = OrderBookAggregator::new(
            map,
            Arc::new(RecordingBookSink::default()) as _,
            Arc::new(RecordingTickSink::default()) as _,
        );

        let result = aggregator
            .on_price_update(update("Y.SPOT", vec![level(1, 1)], vec![level(2, 1)]))
            .await;

        assert!(result.is_err());
    }

    // -------------------------------------------------------------------------
    // Service startup
    // -------------------------------------------------------------------------

    fn service_with(
        source: Arc<dyn InstrumentSource>,
        gateway: Arc<FakeGateway>,
        configured: Vec<InstrumentSubscription>,
    ) -> MarketDataService {
        MarketDataService::new(
            source,
            gateway as _,
            Arc::new(RecordingBookSink::default()) as _,
            Arc::new(RecordingTickSink::default()) as _,
            configured,
        )
    }

    #[tokio::test]
    async fn startup_skips_unknown_instruments() {
        let source = Arc::new(FixedInstrumentSource {
            names: vec!["A.SPOT".to_string(), "B.SPOT".to_string()],
        });
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(
            source,
            Arc::clone(&gateway),
            vec![subscription("A", vec![1]), subscription("C", vec![1])],
        );

        let summary = service.start().await.unwrap();

        assert_eq!(summary, StartupSummary { subscribed: 1, skipped: 1 });
        assert_eq!(service.list_instruments(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn startup_survives_per_instrument_rejection() {
        let source = Arc::new(FixedInstrumentSource {
            names: vec!["A.SPOT".to_string(), "B.SPOT".to_string()],
        });
        let gateway = Arc::new(FakeGateway {
            reject: Some("B.SPOT".to_string()),
            ..Default::default()
        });
        let service = service_with(
            source,
            Arc::clone(&gateway),
            vec![subscription("A", vec![1]), subscription("B", vec![1])],
        );

        let summary = service.start().await.unwrap();

        assert_eq!(summary, StartupSummary { subscribed: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn startup_fails_fatally_without_instrument_list() {
        let service = service_with(
            Arc::new(FailingInstrumentSource),
            Arc::new(FakeGateway::default()),
            vec![subscription("A", vec![1])],
        );

        assert!(matches!(
            service.start().await,
            Err(StartupError::Instruments(_))
        ));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let source = Arc::new(FixedInstrumentSource {
            names: vec!["A.SPOT".to_string()],
        });
        let service = service_with(source, Arc::new(FakeGateway::default()), vec![]);

        service.start().await.unwrap();
        assert!(matches!(
            service.start().await,
            Err(StartupError::AlreadyStarted)
        ));
    }

    // -------------------------------------------------------------------------
    // Query surface
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn queries_flow_through_the_installed_handler() {
        let source = Arc::new(FixedInstrumentSource {
            names: vec!["X.SPOT".to_string()],
        });
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(
            source,
            Arc::clone(&gateway),
            vec![subscription("X", vec![1])],
        );
        service.start().await.unwrap();

        // Feed a price update through the handler the gateway captured.
        let handler = Arc::clone(&gateway.active.lock()[0].1);
        handler
            .on_price_update(update("X.SPOT", vec![level(99, 2)], vec![level(100, 1)]))
            .await
            .unwrap();

        let book = service.get_order_book("X").unwrap();
        assert_eq!(book.bids[0].price, Decimal::from(100));

        let ticks = service.list_tick_prices();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].instrument, "X");

        assert!(service.get_order_book("UNKNOWN").is_none());
    }

    #[tokio::test]
    async fn queries_before_start_are_empty() {
        let service = service_with(
            Arc::new(FailingInstrumentSource),
            Arc::new(FakeGateway::default()),
            vec![],
        );

        assert!(service.list_instruments().is_empty());
        assert!(service.list_tick_prices().is_empty());
        assert!(service.get_order_book("X").is_none());
        assert_eq!(service.cached_book_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_unknown_instrument_fails_before_network() {
        let source = Arc::new(FixedInstrumentSource {
            names: vec!["A.SPOT".to_string()],
        });
        let gateway = Arc::new(FakeGateway::default());
        let service = service_with(source, Arc::clone(&gateway), vec![]);
        service.start().await.unwrap();

        let err = service
            .subscribe("NOPE", Levels::new(vec![1]).unwrap())
            .await
            .unwrap_err();

        assert_eq!(err, SubscribeError::UnknownInstrument("NOPE".to_string()));
        assert!(gateway.active.lock().is_empty());
    }
}
