//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following the
//! Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`OrderBookSink`]: publication target for normalized order books
//! - [`TickPriceSink`]: publication target for derived tick prices
//! - [`InstrumentSource`]: startup supplier of the tradable-instrument list
//! - [`SubscriptionGateway`]: the streaming subscription protocol

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::orderbook::{OrderBook, TickPrice};
use crate::domain::subscription::{AckFailure, BeginError, Levels, LevelsError, PriceHandler};

// =============================================================================
// Sinks
// =============================================================================

/// Failure reported by a publication sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink is no longer accepting messages.
    #[error("sink closed")]
    Closed,
    /// The sink failed to accept the message.
    #[error("publish failed: {0}")]
    Failed(String),
}

/// Publication target for normalized order books.
///
/// At-least-once semantics are assumed by the aggregation layer; retries
/// are the sink's responsibility. `publish` is awaited before the book is
/// cached, so sink latency directly delays the cache update.
#[async_trait]
pub trait OrderBookSink: Send + Sync {
    /// Publish one order book.
    async fn publish(&self, book: &OrderBook) -> Result<(), SinkError>;
}

/// Publication target for derived tick prices.
#[async_trait]
pub trait TickPriceSink: Send + Sync {
    /// Publish one tick price.
    async fn publish(&self, tick: &TickPrice) -> Result<(), SinkError>;
}

// =============================================================================
// Instrument Source
// =============================================================================

/// Failure fetching the tradable-instrument list. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentSourceError {
    /// Transport-level failure reaching the endpoint.
    #[error("instrument list request failed: {0}")]
    Transport(String),
    /// The response body could not be decoded.
    #[error("instrument list decode failed: {0}")]
    Decode(String),
}

/// Startup supplier of the full tradable-instrument list (wire names).
#[async_trait]
pub trait InstrumentSource: Send + Sync {
    /// Fetch the tradable instruments, in wire form.
    async fn tradable_instruments(&self) -> Result<Vec<String>, InstrumentSourceError>;
}

// =============================================================================
// Subscription Gateway
// =============================================================================

/// Why a subscribe operation failed.
///
/// Validation and state failures are raised before any frame is sent;
/// rejections, tag mismatches, and timeouts settle an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// The depth-levels list failed validation.
    #[error(transparent)]
    InvalidLevels(#[from] LevelsError),
    /// The instrument name is empty.
    #[error("instrument name is empty")]
    EmptyInstrument,
    /// The instrument is not in the naming map.
    #[error("unknown instrument {0}")]
    UnknownInstrument(String),
    /// A pending request or active subscription already exists.
    #[error(transparent)]
    State(#[from] BeginError),
    /// The venue answered with `success: false`.
    #[error("subscribe rejected by the venue")]
    Rejected {
        /// Venue-supplied rejection detail, if any.
        reason: Option<String>,
    },
    /// The acknowledgement carried an unexpected correlation tag.
    #[error("subscribe acknowledgement tag mismatch")]
    TagMismatch,
    /// No acknowledgement arrived before the deadline.
    #[error("subscribe timed out awaiting acknowledgement")]
    Timeout,
    /// The session closed before the request resolved.
    #[error("session closed")]
    SessionClosed,
    /// The request frame could not be written to the transport.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<AckFailure> for SubscribeError {
    fn from(failure: AckFailure) -> Self {
        match failure {
            AckFailure::Rejected { reason } => Self::Rejected { reason },
            AckFailure::TagMismatch => Self::TagMismatch,
            AckFailure::SessionClosed => Self::SessionClosed,
        }
    }
}

/// Why an unsubscribe operation failed.
///
/// On any of these the previously installed handler stays active and
/// keeps receiving price updates; failure to unsubscribe never silently
/// stops delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsubscribeError {
    /// The instrument is not in the naming map.
    #[error("unknown instrument {0}")]
    UnknownInstrument(String),
    /// A pending request exists or there is no active subscription.
    #[error(transparent)]
    State(#[from] BeginError),
    /// The venue answered with `success: false`.
    #[error("unsubscribe rejected by the venue")]
    Rejected {
        /// Venue-supplied rejection detail, if any.
        reason: Option<String>,
    },
    /// The acknowledgement carried an unexpected correlation tag.
    #[error("unsubscribe acknowledgement tag mismatch")]
    TagMismatch,
    /// No acknowledgement arrived before the deadline.
    #[error("unsubscribe timed out awaiting acknowledgement")]
    Timeout,
    /// The session closed before the request resolved.
    #[error("session closed")]
    SessionClosed,
    /// The request frame could not be written to the transport.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<AckFailure> for UnsubscribeError {
    fn from(failure: AckFailure) -> Self {
        match failure {
            AckFailure::Rejected { reason } => Self::Rejected { reason },
            AckFailure::TagMismatch => Self::TagMismatch,
            AckFailure::SessionClosed => Self::SessionClosed,
        }
    }
}

/// The streaming subscription protocol, as seen by the application layer.
///
/// The gateway speaks wire instrument names throughout; resolution
/// between canonical and wire form happens in the service layer, which
/// owns the naming map. Request deadlines are part of the gateway's own
/// configuration.
#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    /// Subscribe to an instrument with the given depth levels, installing
    /// the handler on acknowledgement.
    async fn subscribe(
        &self,
        instrument: &str,
        levels: Levels,
        handler: Arc<dyn PriceHandler>,
    ) -> Result<(), SubscribeError>;

    /// Unsubscribe from an instrument, removing its handler on
    /// acknowledgement.
    async fn unsubscribe(&self, instrument: &str) -> Result<(), UnsubscribeError>;

    /// Wire names of all instruments with an active subscription.
    fn active_instruments(&self) -> Vec<String>;

    /// Whether the streaming session is currently open.
    fn is_connected(&self) -> bool;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_failure_maps_to_subscribe_error() {
        assert_eq!(
            SubscribeError::from(AckFailure::TagMismatch),
            SubscribeError::TagMismatch
        );
        assert_eq!(
            SubscribeError::from(AckFailure::SessionClosed),
            SubscribeError::SessionClosed
        );
        assert_eq!(
            SubscribeError::from(AckFailure::Rejected {
                reason: Some("nope".to_string())
            }),
            SubscribeError::Rejected {
                reason: Some("nope".to_string())
            }
        );
    }

    #[test]
    fn ack_failure_maps_to_unsubscribe_error() {
        assert_eq!(
            UnsubscribeError::from(AckFailure::TagMismatch),
            UnsubscribeError::TagMismatch
        );
        assert_eq!(
            UnsubscribeError::from(AckFailure::Rejected { reason: None }),
            UnsubscribeError::Rejected { reason: None }
        );
    }
}
