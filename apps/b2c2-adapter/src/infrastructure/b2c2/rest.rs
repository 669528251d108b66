//! B2C2 REST Client
//!
//! Plain request/response client for the B2C2 REST API. The adapter only
//! needs it for the tradable-instrument list at startup; a transport or
//! decode failure here is fatal to startup, not retried.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{InstrumentSource, InstrumentSourceError};

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the REST client.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The request failed at the transport level.
    #[error("request failed: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The response body could not be decoded.
    #[error("response decode failed: {0}")]
    Decode(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST client.
#[derive(Clone)]
pub struct RestClientConfig {
    /// Base URL of the REST API.
    pub base_url: String,
    /// API token, sent as `Authorization: Token <token>`.
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RestClientConfig {
    /// Create a new configuration with the default request timeout.
    #[must_use]
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url,
            token,
            timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for RestClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// One entry of the `GET /instruments/` response.
///
/// # Wire Format (JSON)
/// ```json
/// {"name": "BTCUSD.SPOT"}
/// ```
#[derive(Debug, Clone, Deserialize)]
struct InstrumentInfo {
    name: String,
}

// =============================================================================
// REST Client
// =============================================================================

/// HTTP client for the B2C2 REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: RestClientConfig,
}

impl RestClient {
    /// Create a new REST client.
    ///
    /// # Errors
    ///
    /// Returns `RestError::Client` if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: RestClientConfig) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RestError::Client(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Fetch the full tradable-instrument list, in wire form.
    ///
    /// # Errors
    ///
    /// Returns `RestError` on transport failure, a non-success status, or
    /// an undecodable body.
    pub async fn list_instruments(&self) -> Result<Vec<String>, RestError> {
        let url = format!("{}/instruments/", self.config.base_url.trim_end_matches('/'));

        let response = self
            .http
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.config.token),
            )
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Status(status.as_u16()));
        }

        let instruments: Vec<InstrumentInfo> = response
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))?;

        Ok(instruments.into_iter().map(|i| i.name).collect())
    }
}

#[async_trait]
impl InstrumentSource for RestClient {
    async fn tradable_instruments(&self) -> Result<Vec<String>, InstrumentSourceError> {
        self.list_instruments().await.map_err(|e| match e {
            RestError::Decode(msg) => InstrumentSourceError::Decode(msg),
            other => InstrumentSourceError::Transport(other.to_string()),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_info_parses() {
        let json = r#"[{"name":"BTCUSD.SPOT"},{"name":"ETHUSD.SPOT","underlier":"ETHUSD"}]"#;
        let infos: Vec<InstrumentInfo> = serde_json::from_str(json).unwrap();

        let names: Vec<String> = infos.into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["BTCUSD.SPOT", "ETHUSD.SPOT"]);
    }

    #[test]
    fn config_debug_redacts_token() {
        let config =
            RestClientConfig::new("https://api.example".to_string(), "secret".to_string());
        let debug = format!("{config:?}");

        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn client_builds() {
        let config =
            RestClientConfig::new("https://api.example".to_string(), "token".to_string());
        assert!(RestClient::new(config).is_ok());
    }
}
