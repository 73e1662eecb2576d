//! Upstream transport port.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

/// Outbound half of an upstream connection, carrying encoded control frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of an upstream connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<TransportEvent, TransportError>> + Send>>;

/// Something received from the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A data or control frame as text.
    Frame(String),
    /// Transport-level liveness traffic (ping/pong).
    Heartbeat,
}

/// An established upstream connection split into its two halves.
pub struct TransportLink {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound events. The stream ending means the connection closed.
    pub stream: FrameStream,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// Opens upstream connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the transport handshake.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the connection cannot be established.
    async fn connect(&self) -> Result<TransportLink, TransportError>;
}

/// Transport failures. Recovered by reconnecting; never shown to listeners.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Handshake failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Peer closed the connection.
    #[error("connection closed: {0}")]
    Closed(String),

    /// No inbound traffic within the idle timeout.
    #[error("no inbound traffic for {0:?}")]
    IdleTimeout(std::time::Duration),
}
