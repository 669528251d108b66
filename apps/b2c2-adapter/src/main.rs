//! B2C2 Market Data Adapter Binary
//!
//! Starts the market data adapter.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin b2c2-adapter
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `B2C2_TOKEN`: B2C2 API token
//! - `B2C2_INSTRUMENTS`: subscriptions, e.g. "BTCUSD:1,ETHUSD:1|5"
//!
//! ## Optional
//! - `B2C2_REST_URL`: REST base URL (default: <https://api.b2c2.net>)
//! - `B2C2_WS_URL`: quote stream URL (default: wss://mm-api.b2c2.net/quotes)
//! - `B2C2_REQUEST_TIMEOUT_SECS`: ack deadline in seconds (default: 5)
//! - `ADAPTER_HEALTH_PORT`: health check HTTP port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: b2c2-adapter)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use b2c2_adapter::infrastructure::b2c2::{RestClient, RestClientConfig, StreamClient, StreamClientConfig};
use b2c2_adapter::infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastOrderBookSink, BroadcastTickPriceSink,
};
use b2c2_adapter::infrastructure::health::{HealthServer, HealthServerState};
use b2c2_adapter::infrastructure::telemetry;
use b2c2_adapter::{AdapterConfig, MarketDataService, SubscriptionRegistry, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting B2C2 market data adapter");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = AdapterConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Broadcast hub and the sinks publishing into it
    let broadcast_hub = Arc::new(BroadcastHub::new(BroadcastConfig {
        order_books_capacity: config.broadcast.order_books_capacity,
        tick_prices_capacity: config.broadcast.tick_prices_capacity,
    }));
    let book_sink = Arc::new(BroadcastOrderBookSink::new(Arc::clone(&broadcast_hub)));
    let tick_sink = Arc::new(BroadcastTickPriceSink::new(Arc::clone(&broadcast_hub)));

    // REST client for the tradable-instrument list
    let rest_client = Arc::new(RestClient::new(RestClientConfig::new(
        config.rest_url.clone(),
        config.credentials.token().to_string(),
    ))?);

    // Streaming session
    let registry = Arc::new(SubscriptionRegistry::new());
    let stream_config = StreamClientConfig {
        url: config.stream.url.clone(),
        token: config.credentials.token().to_string(),
        request_timeout: config.stream.request_timeout,
    };
    let stream_client = Arc::new(StreamClient::new(
        stream_config,
        registry,
        shutdown_token.clone(),
    ));

    // Market data service
    let service = Arc::new(MarketDataService::new(
        rest_client,
        Arc::clone(&stream_client) as _,
        book_sink,
        tick_sink,
        config.instruments.clone(),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
        Arc::clone(&broadcast_hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Connect the session, then run the startup sequence. A connect or
    // instrument-list failure is fatal; individual subscription failures
    // are logged and skipped inside start().
    Arc::clone(&stream_client).connect().await?;
    let summary = service.start().await?;
    tracing::info!(
        subscribed = summary.subscribed,
        skipped = summary.skipped,
        "Adapter ready"
    );

    await_shutdown(shutdown_token).await;

    stream_client.disconnect().await;
    tracing::info!("Adapter stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &AdapterConfig) {
    tracing::info!(
        rest_url = %config.rest_url,
        stream_url = %config.stream.url,
        request_timeout_ms = config.stream.request_timeout.as_millis() as u64,
        instruments = config.instruments.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
