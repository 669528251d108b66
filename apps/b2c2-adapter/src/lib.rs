#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! B2C2 Market Data Adapter
//!
//! Maintains a single persistent connection to B2C2's streaming API,
//! multiplexes per-instrument subscribe/unsubscribe handshakes over it via
//! correlation tags, and fans decoded price updates out to a normalized
//! order-book cache and in-process publication sinks.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and state
//!   - `instruments`: wire/canonical naming map
//!   - `orderbook`: normalized books, tick prices, read caches
//!   - `subscription`: depth levels, price handlers, the registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: sinks, instrument source, subscription gateway
//!   - `services`: aggregation pipeline, startup, query surface
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `b2c2`: WebSocket stream client and REST client
//!   - `broadcast`: channel-based sink implementations
//!   - `config`: configuration from environment variables
//!   - `health`: health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! B2C2 quotes WS ──► Codec ──► Dispatch ──► Aggregator ──► Order-book sink
//!                      │          │             │      └──► Tick-price sink
//!                      │     ack correlation    └─► caches ──► queries
//!                      └──► unrecognized frames dropped
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market-data types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instruments::{InstrumentMap, SPOT_SUFFIX, canonical_name};
pub use domain::orderbook::{BookLevel, OrderBook, PriceUpdate, TickPrice};
pub use domain::subscription::{
    InstrumentSubscription, Levels, LevelsError, PriceHandler, SubscriptionRegistry,
};

// Application surface
pub use application::ports::{
    InstrumentSource, OrderBookSink, SubscribeError, SubscriptionGateway, TickPriceSink,
    UnsubscribeError,
};
pub use application::services::{MarketDataService, OrderBookAggregator, StartupSummary};

// Infrastructure config
pub use infrastructure::config::{AdapterConfig, ConfigError, Credentials};

// Stream and REST clients (for integration tests)
pub use infrastructure::b2c2::{
    RestClient, RestClientConfig, SessionError, StreamClient, StreamClientConfig,
};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastOrderBookSink, BroadcastStats, BroadcastTickPriceSink,
    SharedBroadcastHub,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
