//! Domain Layer - Core subscription types and business logic.
//!
//! Pure Rust types with no I/O: topics, decoded market data, and the
//! listener registry.

/// Market data streaming types (trades, depth).
pub mod streaming;

/// Listener registry and upstream subscription bookkeeping.
pub mod subscription;

/// Stream kinds and topics.
pub mod topic;
