//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (sinks, REST, stream).
pub mod ports;

/// Application services for aggregation and the query surface.
pub mod services;
