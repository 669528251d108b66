//! Configuration Module
//!
//! Configuration loading and dependency injection for the adapter.

mod settings;

pub use crate::domain::subscription::InstrumentSubscription;
pub use settings::{
    AdapterConfig, BroadcastSettings, ConfigError, Credentials, ServerSettings, StreamSettings,
};
