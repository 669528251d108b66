//! B2C2 WebSocket Message Types
//!
//! Wire format types for the B2C2 streaming API. All frames are UTF-8
//! JSON objects carrying an `event` discriminator.
//!
//! # Message Types
//!
//! ## Outbound
//! - `SubscribeRequest`: open a price stream for one instrument
//! - `UnsubscribeRequest`: close a price stream for one instrument
//!
//! ## Inbound
//! - `TradableInstrumentsMessage`: connection announcement with the full
//!   instrument list
//! - `SubscribeAckMessage` / `UnsubscribeAckMessage`: request
//!   acknowledgements, correlated by `tag`, with `success` indicating
//!   protocol-level acceptance or rejection
//! - `PriceMessage`: unsolicited price update with two ladders

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::orderbook::{BookLevel, PriceUpdate};

// =============================================================================
// Outbound Requests
// =============================================================================

/// Subscribe request for one instrument.
///
/// # Wire Format (JSON)
/// ```json
/// {"event":"subscribe","instrument":"BTCUSD.SPOT","levels":[1],"tag":"d1b72e28"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Message discriminator (always "subscribe").
    pub event: String,
    /// Wire instrument name.
    pub instrument: String,
    /// Requested depth tiers per side.
    pub levels: Vec<u32>,
    /// Correlation tag echoed in the acknowledgement.
    pub tag: String,
}

impl SubscribeRequest {
    /// Create a subscribe request.
    #[must_use]
    pub fn new(instrument: &str, levels: Vec<u32>, tag: &str) -> Self {
        Self {
            event: "subscribe".to_string(),
            instrument: instrument.to_string(),
            levels,
            tag: tag.to_string(),
        }
    }
}

/// Unsubscribe request for one instrument.
///
/// # Wire Format (JSON)
/// ```json
/// {"event":"unsubscribe","instrument":"BTCUSD.SPOT","tag":"7f3a9c10"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    /// Message discriminator (always "unsubscribe").
    pub event: String,
    /// Wire instrument name.
    pub instrument: String,
    /// Correlation tag echoed in the acknowledgement.
    pub tag: String,
}

impl UnsubscribeRequest {
    /// Create an unsubscribe request.
    #[must_use]
    pub fn new(instrument: &str, tag: &str) -> Self {
        Self {
            event: "unsubscribe".to_string(),
            instrument: instrument.to_string(),
            tag: tag.to_string(),
        }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Connection announcement carrying the tradable-instrument list.
///
/// # Wire Format (JSON)
/// ```json
/// {"event":"tradable_instruments","success":true,
///  "tradable_instruments":["BTCUSD.SPOT","ETHUSD.SPOT"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradableInstrumentsMessage {
    /// Message discriminator (always "tradable_instruments").
    pub event: String,
    /// Whether the announcement reports success.
    #[serde(default = "default_success")]
    pub success: bool,
    /// Wire names of every tradable instrument.
    #[serde(default)]
    pub tradable_instruments: Vec<String>,
}

/// Subscribe acknowledgement.
///
/// `success: false` is a protocol-level rejection, not a decode failure;
/// rejection acks carry `error_message` instead of `levels`.
///
/// # Wire Format (JSON)
/// ```json
/// {"event":"subscribe","success":true,"instrument":"BTCUSD.SPOT",
///  "levels":[1],"tag":"d1b72e28"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeAckMessage {
    /// Message discriminator (always "subscribe").
    pub event: String,
    /// Protocol-level acceptance flag.
    pub success: bool,
    /// Wire instrument the acknowledgement refers to.
    #[serde(default)]
    pub instrument: Option<String>,
    /// Correlation tag copied from the request.
    #[serde(default)]
    pub tag: Option<String>,
    /// Venue-supplied rejection detail.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Unsubscribe acknowledgement, symmetric to [`SubscribeAckMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeAckMessage {
    /// Message discriminator (always "unsubscribe").
    pub event: String,
    /// Protocol-level acceptance flag.
    pub success: bool,
    /// Wire instrument the acknowledgement refers to.
    #[serde(default)]
    pub instrument: Option<String>,
    /// Correlation tag copied from the request.
    #[serde(default)]
    pub tag: Option<String>,
    /// Venue-supplied rejection detail.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One tier of a wire price ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLevel {
    /// Tier price, sent by the venue as a decimal string.
    pub price: Decimal,
    /// Quantity at this price.
    pub quantity: Decimal,
}

/// The two price ladders of a price update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLadders {
    /// Prices the client can buy at, best first.
    #[serde(default)]
    pub buy: Vec<WireLevel>,
    /// Prices the client can sell at, best first.
    #[serde(default)]
    pub sell: Vec<WireLevel>,
}

/// Unsolicited price update for a subscribed instrument.
///
/// # Wire Format (JSON)
/// ```json
/// {"event":"price","success":true,"instrument":"BTCUSD.SPOT",
///  "levels":{"buy":[{"price":"11547.83","quantity":"1"}],
///            "sell":[{"price":"11545.90","quantity":"1"}]},
///  "timestamp":1565021486130}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceMessage {
    /// Message discriminator (always "price").
    pub event: String,
    /// Wire instrument name.
    pub instrument: String,
    /// Whether the update reports success.
    #[serde(default = "default_success")]
    pub success: bool,
    /// The two price ladders.
    #[serde(default)]
    pub levels: PriceLadders,
    /// Event timestamp in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl PriceMessage {
    /// Convert the wire frame into the domain price update.
    #[must_use]
    pub fn to_update(&self) -> PriceUpdate {
        PriceUpdate {
            instrument: self.instrument.clone(),
            timestamp: DateTime::<Utc>::from_timestamp_millis(self.timestamp).unwrap_or_default(),
            buy: ladder_to_levels(&self.levels.buy),
            sell: ladder_to_levels(&self.levels.sell),
        }
    }
}

fn ladder_to_levels(ladder: &[WireLevel]) -> Vec<BookLevel> {
    ladder
        .iter()
        .map(|tier| BookLevel::new(tier.price, tier.quantity))
        .collect()
}

const fn default_success() -> bool {
    true
}

// =============================================================================
// Classified Inbound Message
// =============================================================================

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Connection announcement with the tradable-instrument list.
    TradableInstruments(TradableInstrumentsMessage),
    /// Subscribe acknowledgement.
    SubscribeAck(SubscribeAckMessage),
    /// Unsubscribe acknowledgement.
    UnsubscribeAck(UnsubscribeAckMessage),
    /// Price update.
    Price(PriceMessage),
    /// Frame that could not be classified; dropped with a log.
    Unrecognized {
        /// Short diagnostic for the log line.
        reason: String,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_serializes_event_and_tag() {
        let request = SubscribeRequest::new("BTCUSD.SPOT", vec![1, 5], "tag-1");
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""event":"subscribe""#));
        assert!(json.contains(r#""instrument":"BTCUSD.SPOT""#));
        assert!(json.contains(r#""levels":[1,5]"#));
        assert!(json.contains(r#""tag":"tag-1""#));
    }

    #[test]
    fn unsubscribe_request_serializes() {
        let request = UnsubscribeRequest::new("BTCUSD.SPOT", "tag-2");
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""event":"unsubscribe""#));
        assert!(json.contains(r#""tag":"tag-2""#));
    }

    #[test]
    fn tradable_instruments_parses() {
        let json = r#"{"event":"tradable_instruments","success":true,
                       "tradable_instruments":["BTCUSD.SPOT","ETHUSD.SPOT"]}"#;
        let msg: TradableInstrumentsMessage = serde_json::from_str(json).unwrap();

        assert!(msg.success);
        assert_eq!(msg.tradable_instruments.len(), 2);
    }

    #[test]
    fn subscribe_ack_success_parses() {
        let json = r#"{"event":"subscribe","success":true,
                       "instrument":"BTCUSD.SPOT","levels":[1],"tag":"d1b72e28"}"#;
        let ack: SubscribeAckMessage = serde_json::from_str(json).unwrap();

        assert!(ack.success);
        assert_eq!(ack.instrument.as_deref(), Some("BTCUSD.SPOT"));
        assert_eq!(ack.tag.as_deref(), Some("d1b72e28"));
        assert!(ack.error_message.is_none());
    }

    #[test]
    fn subscribe_ack_rejection_parses() {
        let json = r#"{"event":"subscribe","success":false,
                       "instrument":"BTCUSD.SPOT","tag":"d1b72e28",
                       "error_message":"instrument not tradable"}"#;
        let ack: SubscribeAckMessage = serde_json::from_str(json).unwrap();

        assert!(!ack.success);
        assert_eq!(
            ack.error_message.as_deref(),
            Some("instrument not tradable")
        );
    }

    #[test]
    fn price_message_parses_string_decimals() {
        let json = r#"{"event":"price","success":true,"instrument":"BTCUSD.SPOT",
                       "levels":{"buy":[{"price":"11547.83","quantity":"1"}],
                                 "sell":[{"price":"11545.90","quantity":"2"}]},
                       "timestamp":1565021486130}"#;
        let price: PriceMessage = serde_json::from_str(json).unwrap();

        assert_eq!(price.instrument, "BTCUSD.SPOT");
        assert_eq!(price.levels.buy[0].price.to_string(), "11547.83");
        assert_eq!(price.levels.sell[0].quantity, Decimal::from(2));
    }

    #[test]
    fn price_message_converts_to_domain_update() {
        let price = PriceMessage {
            event: "price".to_string(),
            instrument: "BTCUSD.SPOT".to_string(),
            success: true,
            levels: PriceLadders {
                buy: vec![WireLevel {
                    price: Decimal::from(99),
                    quantity: Decimal::from(2),
                }],
                sell: vec![WireLevel {
                    price: Decimal::from(100),
                    quantity: Decimal::from(1),
                }],
            },
            timestamp: 1_565_021_486_130,
        };

        let update = price.to_update();

        assert_eq!(update.instrument, "BTCUSD.SPOT");
        assert_eq!(update.buy[0].price, Decimal::from(99));
        assert_eq!(update.sell[0].price, Decimal::from(100));
        assert_eq!(update.timestamp.timestamp_millis(), 1_565_021_486_130);
    }

    #[test]
    fn price_message_with_empty_ladders() {
        let json = r#"{"event":"price","instrument":"BTCUSD.SPOT","timestamp":0}"#;
        let price: PriceMessage = serde_json::from_str(json).unwrap();

        assert!(price.success);
        assert!(price.levels.buy.is_empty());
        assert!(price.levels.sell.is_empty());
    }
}
