//! Adapter Configuration Settings
//!
//! Configuration types for the adapter, loaded from environment variables.
//! Everything here is validated before any network action: a malformed
//! token, URL, or instrument specification is a startup error.

use std::time::Duration;

use crate::domain::subscription::{InstrumentSubscription, Levels, LevelsError};

/// B2C2 API credentials.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyValue` if the token is empty.
    pub fn new(token: String) -> Result<Self, ConfigError> {
        if token.is_empty() {
            return Err(ConfigError::EmptyValue("B2C2_TOKEN".to_string()));
        }
        Ok(Self { token })
    }

    /// Get the API token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket URL of the quote stream.
    pub url: String,
    /// Deadline for each subscribe/unsubscribe acknowledgement.
    pub request_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: "wss://mm-api.b2c2.net/quotes".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Capacity of the order-book broadcast channel.
    pub order_books_capacity: usize,
    /// Capacity of the tick-price broadcast channel.
    pub tick_prices_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            order_books_capacity: 10_000,
            tick_prices_capacity: 10_000,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Base URL of the REST API.
    pub rest_url: String,
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// Subscriptions to establish at startup.
    pub instruments: Vec<InstrumentSubscription>,
    /// Server port settings.
    pub server: ServerSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
}

impl AdapterConfig {
    /// Create configuration from environment variables.
    ///
    /// # Required
    /// - `B2C2_TOKEN`: API token
    /// - `B2C2_INSTRUMENTS`: subscriptions, e.g. `"BTCUSD:1,ETHUSD:1|5"`
    ///   (comma-separated `instrument:levels` pairs, levels separated by
    ///   `|`)
    ///
    /// # Optional
    /// - `B2C2_REST_URL`: REST base URL (default: `https://api.b2c2.net`)
    /// - `B2C2_WS_URL`: quote stream URL (default: `wss://mm-api.b2c2.net/quotes`)
    /// - `B2C2_REQUEST_TIMEOUT_SECS`: ack deadline (default: 5)
    /// - `ADAPTER_HEALTH_PORT`: health HTTP port (default: 8082)
    /// - `ADAPTER_ORDER_BOOKS_CAPACITY` / `ADAPTER_TICK_PRICES_CAPACITY`
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for missing or malformed values; nothing
    /// is validated lazily.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var("B2C2_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("B2C2_TOKEN".to_string()))?;
        let credentials = Credentials::new(token)?;

        let spec = std::env::var("B2C2_INSTRUMENTS")
            .map_err(|_| ConfigError::MissingEnvVar("B2C2_INSTRUMENTS".to_string()))?;
        let instruments = parse_instruments(&spec)?;

        let rest_url =
            std::env::var("B2C2_REST_URL").unwrap_or_else(|_| "https://api.b2c2.net".to_string());

        let stream = StreamSettings {
            url: std::env::var("B2C2_WS_URL").unwrap_or_else(|_| StreamSettings::default().url),
            request_timeout: parse_env_duration_secs(
                "B2C2_REQUEST_TIMEOUT_SECS",
                StreamSettings::default().request_timeout,
            ),
        };

        let server = ServerSettings {
            health_port: parse_env_u16("ADAPTER_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let broadcast = BroadcastSettings {
            order_books_capacity: parse_env_usize(
                "ADAPTER_ORDER_BOOKS_CAPACITY",
                BroadcastSettings::default().order_books_capacity,
            ),
            tick_prices_capacity: parse_env_usize(
                "ADAPTER_TICK_PRICES_CAPACITY",
                BroadcastSettings::default().tick_prices_capacity,
            ),
        };

        Ok(Self {
            credentials,
            rest_url,
            stream,
            instruments,
            server,
            broadcast,
        })
    }
}

/// Parse the `B2C2_INSTRUMENTS` specification.
///
/// Format: comma-separated `instrument:levels` pairs where `levels` is
/// one or two `|`-separated positive integers, e.g. `"BTCUSD:1,ETHUSD:1|5"`.
fn parse_instruments(spec: &str) -> Result<Vec<InstrumentSubscription>, ConfigError> {
    if spec.trim().is_empty() {
        return Err(ConfigError::EmptyValue("B2C2_INSTRUMENTS".to_string()));
    }

    let mut subscriptions = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let Some((instrument, levels_spec)) = entry.split_once(':') else {
            return Err(ConfigError::InvalidInstrumentSpec {
                entry: entry.to_string(),
                reason: "expected instrument:levels".to_string(),
            });
        };

        let instrument = instrument.trim();
        if instrument.is_empty() {
            return Err(ConfigError::InvalidInstrumentSpec {
                entry: entry.to_string(),
                reason: "empty instrument name".to_string(),
            });
        }

        let mut tiers = Vec::new();
        for tier in levels_spec.split('|') {
            let tier: u32 =
                tier.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidInstrumentSpec {
                        entry: entry.to_string(),
                        reason: format!("invalid level {:?}", tier.trim()),
                    })?;
            tiers.push(tier);
        }

        let levels = Levels::new(tiers).map_err(|e| ConfigError::InvalidLevels {
            instrument: instrument.to_string(),
            source: e,
        })?;

        subscriptions.push(InstrumentSubscription {
            instrument: instrument.to_string(),
            levels,
        });
    }

    if subscriptions.is_empty() {
        return Err(ConfigError::EmptyValue("B2C2_INSTRUMENTS".to_string()));
    }

    Ok(subscriptions)
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// An instrument entry could not be parsed.
    #[error("invalid instrument spec {entry:?}: {reason}")]
    InvalidInstrumentSpec {
        /// The offending entry.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },
    /// An instrument's depth levels failed validation.
    #[error("invalid levels for {instrument}: {source}")]
    InvalidLevels {
        /// The instrument whose levels were rejected.
        instrument: String,
        /// The underlying validation failure.
        source: LevelsError,
    },
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

// =============================================================================
// Tests
// =============================================================================
