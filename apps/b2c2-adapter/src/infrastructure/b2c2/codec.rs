//! Stream Codec Module
//!
//! Encoding and decoding for the B2C2 WebSocket stream. Every frame is a
//! single JSON object with an `event` discriminator.
//!
//! Decoding is total: a frame with an unknown or missing discriminator,
//! or one that fails structural parsing, classifies as
//! [`StreamMessage::Unrecognized`] so the receive loop can drop it with a
//! log. A `success: false` flag inside an acknowledgement is a
//! protocol-level rejection carried in the decoded message, never a
//! decode failure.

use crate::infrastructure::b2c2::messages::{
    PriceMessage, StreamMessage, SubscribeAckMessage, TradableInstrumentsMessage,
    UnsubscribeAckMessage,
};

/// Codec errors (encoding only; decoding never fails).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON codec for the B2C2 quote stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode an outbound request to a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    /// Classify and decode an inbound text frame.
    ///
    /// Inspects the `event` discriminator and decodes into the matching
    /// message type; anything else becomes `Unrecognized`.
    #[must_use]
    pub fn decode(&self, text: &str) -> StreamMessage {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return StreamMessage::Unrecognized {
                    reason: format!("not a JSON object: {e}"),
                };
            }
        };

        let Some(event) = value
            .get("event")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
        else {
            return StreamMessage::Unrecognized {
                reason: "missing event discriminator".to_string(),
            };
        };

        match event.as_str() {
            "tradable_instruments" => {
                match serde_json::from_value::<TradableInstrumentsMessage>(value) {
                    Ok(m) => StreamMessage::TradableInstruments(m),
                    Err(e) => unrecognized(&event, &e),
                }
            }
            "subscribe" => match serde_json::from_value::<SubscribeAckMessage>(value) {
                Ok(m) => StreamMessage::SubscribeAck(m),
                Err(e) => unrecognized(&event, &e),
            },
            "unsubscribe" => match serde_json::from_value::<UnsubscribeAckMessage>(value) {
                Ok(m) => StreamMessage::UnsubscribeAck(m),
                Err(e) => unrecognized(&event, &e),
            },
            "price" => match serde_json::from_value::<PriceMessage>(value) {
                Ok(m) => StreamMessage::Price(m),
                Err(e) => unrecognized(&event, &e),
            },
            other => StreamMessage::Unrecognized {
                reason: format!("unknown event {other:?}"),
            },
        }
    }
}

fn unrecognized(event: &str, error: &serde_json::Error) -> StreamMessage {
    StreamMessage::Unrecognized {
        reason: format!("malformed {event} frame: {error}"),
    }
}

// =============================================================================
// Tests
// =============================================================================
