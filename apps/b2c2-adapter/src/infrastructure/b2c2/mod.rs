//! B2C2 Adapters
//!
//! Clients for B2C2's two API surfaces:
//!
//! - **Quote stream**: WebSocket subscription protocol and price dispatch
//! - **REST**: tradable-instrument list at startup

pub mod codec;
pub mod messages;
pub mod rest;
pub mod stream;

pub use codec::{CodecError, JsonCodec};
pub use messages::{
    PriceLadders, PriceMessage, StreamMessage, SubscribeAckMessage, SubscribeRequest,
    TradableInstrumentsMessage, UnsubscribeAckMessage, UnsubscribeRequest, WireLevel,
};
pub use rest::{RestClient, RestClientConfig, RestError};
pub use stream::{SessionError, StreamClient, StreamClientConfig};
