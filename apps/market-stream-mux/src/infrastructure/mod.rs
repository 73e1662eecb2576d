//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Envelope codecs (envelope JSON, Binance).
pub mod codec;

/// Configuration loading.
pub mod config;

/// Upstream connection manager and WebSocket transport.
pub mod connection;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
