//! Configuration Module
//!
//! Configuration loading for the multiplexer service.

mod settings;

pub use settings::{CodecKind, ConfigError, ConnectionSettings, MuxSettings, ServerSettings};
