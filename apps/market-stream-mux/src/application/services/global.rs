//! Process-wide multiplexer instance.
//!
//! For callers that cannot thread a `StreamMux` through their code. The
//! instance is installed once and lives for the rest of the process.

use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;

use crate::application::services::mux::{StreamMux, SubscriptionHandle};
use crate::domain::streaming::{DepthMessage, TradeMessage};
use crate::domain::topic::SubscriptionError;
use crate::infrastructure::config::MuxSettings;

static INSTANCE: OnceLock<StreamMux> = OnceLock::new();

/// Build a WebSocket multiplexer from settings and install it.
///
/// # Errors
///
/// Returns `SubscriptionError::AlreadyInitialized` if an instance exists.
pub fn init(
    settings: &MuxSettings,
    cancel: CancellationToken,
) -> Result<&'static StreamMux, SubscriptionError> {
    if INSTANCE.get().is_some() {
        return Err(SubscriptionError::AlreadyInitialized);
    }
    install(StreamMux::from_settings(settings, cancel))
}

/// Install an existing multiplexer as the process-wide instance.
///
/// # Errors
///
/// Returns `SubscriptionError::AlreadyInitialized` if an instance exists.
pub fn install(mux: StreamMux) -> Result<&'static StreamMux, SubscriptionError> {
    INSTANCE
        .set(mux)
        .map_err(|_| SubscriptionError::AlreadyInitialized)?;
    INSTANCE.get().ok_or(SubscriptionError::NotInitialized)
}

/// Get the installed instance, if any.
#[must_use]
pub fn instance() -> Option<&'static StreamMux> {
    INSTANCE.get()
}

/// Subscribe to trades on the process-wide instance.
///
/// # Errors
///
/// Returns `NotInitialized` before `init`/`install`, or `InvalidTopic`.
pub fn subscribe_to_trades<F>(symbol: &str, on_trade: F) -> Result<SubscriptionHandle, SubscriptionError>
where
    F: Fn(&TradeMessage) + Send + Sync + 'static,
{
    instance()
        .ok_or(SubscriptionError::NotInitialized)?
        .subscribe_to_trades(symbol, on_trade)
}

/// Subscribe to depth on the process-wide instance.
///
/// # Errors
///
/// Returns `NotInitialized` before `init`/`install`, or `InvalidTopic`.
pub fn subscribe_to_depth<F>(symbol: &str, on_depth: F) -> Result<SubscriptionHandle, SubscriptionError>
where
    F: Fn(&DepthMessage) + Send + Sync + 'static,
{
    instance()
        .ok_or(SubscriptionError::NotInitialized)?
        .subscribe_to_depth(symbol, on_depth)
}
