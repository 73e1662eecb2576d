#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream Mux - Market Data Subscription Multiplexer
//!
//! Maintains a single upstream streaming connection to a market data provider
//! and fans inbound trades and order book depth updates out to any number of
//! in-process listeners. Upstream subscriptions are reference counted per
//! topic and restored after every reconnect.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `topic`: Stream kinds and `(kind, symbol)` topics
//!   - `streaming`: Decoded trade and depth messages
//!   - `subscription`: Listener registry and pending upstream topics
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport, codec, frame handler, resync source
//!   - `services`: `StreamMux` facade, dispatcher, process-wide instance
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `connection`: Connection manager, backoff, WebSocket transport
//!   - `codec`: Envelope JSON, Binance and relay wire formats
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    subscribe/unsubscribe
//!  listeners ──► StreamMux ──► ConnectionManager ──► upstream WS
//!      ▲                              │
//!      └──────── Dispatcher ◄─────────┘ inbound frames
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core subscription types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    DepthMessage, DepthUpdate, PriceLevel, StreamMessage, TradeMessage, TradeSide,
};
pub use domain::subscription::{ControlAction, ControlFrame, Listener, RegistryStats};
pub use domain::topic::{StreamKind, SubscriptionError, Topic};

// Ports
pub use application::ports::{
    CodecError, ControlReply, Envelope, EnvelopeCodec, Transport, TransportError,
    TransportEvent, TransportLink,
};

// Services
pub use application::services::global;
pub use application::services::{ListenerError, StreamMux, SubscriptionHandle};

// Infrastructure
pub use infrastructure::codec::{BinanceCodec, EnvelopeJsonCodec, RelayCodec};
pub use infrastructure::config::{CodecKind, ConfigError, MuxSettings};
pub use infrastructure::connection::websocket::WebSocketTransport;
pub use infrastructure::connection::{ConnectionConfig, ConnectionState};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
