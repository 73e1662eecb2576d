//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the subscription core interacts with external systems.

/// Port interfaces for external systems (transport, codec).
pub mod ports;

/// Application services: dispatcher, subscription facade, global instance.
pub mod services;
