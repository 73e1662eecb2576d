//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `StreamMux`: Consumer-facing subscribe/unsubscribe facade
//! - `Dispatcher`: Decodes inbound frames and fans them out to listeners
//! - `global`: Optional process-wide `StreamMux`

/// Inbound frame routing.
pub mod dispatcher;

/// Process-wide instance.
pub mod global;

/// Subscription facade and handles.
pub mod mux;

/// Shared registry and pending-topic state.
pub mod state;

pub use dispatcher::{DispatchOutcome, Dispatcher, ListenerError};
pub use mux::{StreamMux, SubscriptionHandle};
pub use state::SubscriptionState;
