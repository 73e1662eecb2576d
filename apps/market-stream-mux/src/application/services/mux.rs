//! Subscription Facade
//!
//! `StreamMux` is the consumer entry point: subscribe a callback to a topic,
//! get back a handle whose `unsubscribe()` is idempotent. The upstream
//! connection is opened lazily on the first subscription and shared by all.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use market_stream_mux::{EnvelopeJsonCodec, StreamMux, WebSocketTransport};
//! use market_stream_mux::infrastructure::connection::ConnectionConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), market_stream_mux::SubscriptionError> {
//! let mux = StreamMux::new(
//!     ConnectionConfig::default(),
//!     Arc::new(WebSocketTransport::new("ws://localhost:8899/ws")),
//!     Arc::new(EnvelopeJsonCodec::new()),
//!     CancellationToken::new(),
//! );
//!
//! let handle = mux.subscribe_to_trades("BTCUSDT", |trade| {
//!     println!("{} {} @ {}", trade.symbol, trade.quantity, trade.price);
//! })?;
//!
//! handle.unsubscribe();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EnvelopeCodec, Transport};
use crate::application::services::dispatcher::Dispatcher;
use crate::application::services::state::SubscriptionState;
use crate::domain::streaming::{DepthMessage, StreamMessage, TradeMessage};
use crate::domain::subscription::{Listener, ListenerId, RegistryStats};
use crate::domain::topic::{StreamKind, SubscriptionError, Topic};
use crate::infrastructure::codec::build_codec;
use crate::infrastructure::config::MuxSettings;
use crate::infrastructure::connection::websocket::WebSocketTransport;
use crate::infrastructure::connection::{ConnectionConfig, ConnectionManager, ConnectionState};

// =============================================================================
// Stream Mux
// =============================================================================

/// Multiplexes many topic subscriptions over one upstream connection.
///
/// Cheap to clone; clones share state and connection.
#[derive(Clone)]
pub struct StreamMux {
    state: Arc<SubscriptionState>,
    connection: ConnectionManager,
}

impl StreamMux {
    /// Create a multiplexer over the given transport and codec.
    ///
    /// Must be called inside a Tokio runtime for the connection to start.
    /// `cancel` tears the connection down for good.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn EnvelopeCodec>,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(SubscriptionState::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&state), Arc::clone(&codec)));
        let resync: Arc<SubscriptionState> = Arc::clone(&state);
        let connection =
            ConnectionManager::new(config, transport, codec, dispatcher, resync, cancel);

        Self { state, connection }
    }

    /// Create a WebSocket multiplexer from settings.
    #[must_use]
    pub fn from_settings(settings: &MuxSettings, cancel: CancellationToken) -> Self {
        Self::new(
            ConnectionConfig::from_connection_settings(&settings.connection),
            Arc::new(WebSocketTransport::new(settings.url.clone())),
            build_codec(settings.codec),
            cancel,
        )
    }

    /// Subscribe a listener to a topic.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::InvalidTopic` for an empty symbol; nothing
    /// is registered and no connection is opened.
    pub fn subscribe(
        &self,
        kind: StreamKind,
        symbol: &str,
        listener: Listener,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let topic = Topic::new(kind, symbol)?;

        let id = self
            .state
            .register(topic.clone(), listener, |frame| self.connection.send(frame));
        self.connection.connect();

        tracing::debug!(topic = %topic, listener = id, "Listener subscribed");

        Ok(SubscriptionHandle {
            topic,
            id,
            state: Arc::clone(&self.state),
            connection: self.connection.clone(),
            active: AtomicBool::new(true),
        })
    }

    /// Subscribe to executed trades for a symbol.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::InvalidTopic` for an empty symbol.
    pub fn subscribe_to_trades<F>(
        &self,
        symbol: &str,
        on_trade: F,
    ) -> Result<SubscriptionHandle, SubscriptionError>
    where
        F: Fn(&TradeMessage) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(move |message: &StreamMessage| {
            if let StreamMessage::Trade(trade) = message {
                on_trade(trade);
            }
        });
        self.subscribe(StreamKind::Trade, symbol, listener)
    }

    /// Subscribe to order book depth updates for a symbol.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::InvalidTopic` for an empty symbol.
    pub fn subscribe_to_depth<F>(
        &self,
        symbol: &str,
        on_depth: F,
    ) -> Result<SubscriptionHandle, SubscriptionError>
    where
        F: Fn(&DepthMessage) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(move |message: &StreamMessage| {
            if let StreamMessage::Depth(depth) = message {
                on_depth(depth);
            }
        });
        self.subscribe(StreamKind::Depth, symbol, listener)
    }

    /// Get the upstream connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch upstream connection state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Topics with at least one listener.
    #[must_use]
    pub fn active_topics(&self) -> Vec<Topic> {
        self.state.topics()
    }

    /// Listener statistics by stream kind.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.state.stats()
    }

    /// Control frames not yet written upstream.
    #[must_use]
    pub fn queued_control_frames(&self) -> usize {
        self.connection.queued_frames()
    }

    /// Control frames lost to outbound queue overflow.
    #[must_use]
    pub fn dropped_control_frames(&self) -> u64 {
        self.connection.dropped_frames()
    }
}

impl fmt::Debug for StreamMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamMux")
            .field("connection", &self.connection)
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Handle to one listener registration.
///
/// Dropping the handle leaves the listener registered; call `unsubscribe()`.
pub struct SubscriptionHandle {
    topic: Topic,
    id: ListenerId,
    state: Arc<SubscriptionState>,
    connection: ConnectionManager,
    active: AtomicBool,
}

impl SubscriptionHandle {
    /// Remove this listener. Later calls are no-ops.
    ///
    /// Sends an upstream unsubscribe when this was the topic's last listener.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let became_empty = self
            .state
            .unregister(&self.topic, self.id, |frame| self.connection.send(frame));

        tracing::debug!(
            topic = %self.topic,
            listener = self.id,
            last = became_empty,
            "Listener unsubscribed"
        );
    }

    /// Get the subscribed topic.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Check whether `unsubscribe()` has not been called yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{TransportError, TransportLink};
    use crate::infrastructure::codec::EnvelopeJsonCodec;

    struct RefusingTransport;

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn connect(&self) -> Result<TransportLink, TransportError> {
            Err(TransportError::ConnectionFailed("refused".to_string()))
        }
    }

    fn mux() -> StreamMux {
        StreamMux::new(
            ConnectionConfig::default(),
            Arc::new(RefusingTransport),
            Arc::new(EnvelopeJsonCodec::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn empty_symbol_is_rejected_without_side_effects() {
        let mux = mux();

        let err = mux.subscribe_to_trades("  ", |_| {}).unwrap_err();

        assert!(matches!(err, SubscriptionError::InvalidTopic(_)));
        assert!(mux.active_topics().is_empty());
        assert_eq!(mux.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let mux = mux();
        let a = mux.subscribe_to_trades("btcusdt", |_| {}).unwrap();
        let b = mux.subscribe_to_trades("BTCUSDT", |_| {}).unwrap();
        assert_eq!(a.topic(), b.topic());
        assert_eq!(mux.stats().trades.listener_count, 2);

        a.unsubscribe();
        a.unsubscribe();
        assert!(!a.is_active());
        assert_eq!(mux.stats().trades.listener_count, 1);

        b.unsubscribe();
        assert!(mux.active_topics().is_empty());
    }

    #[tokio::test]
    async fn first_subscription_starts_connection() {
        let mux = mux();
        assert_eq!(mux.connection_state(), ConnectionState::Disconnected);

        let _handle = mux.subscribe_to_depth("ETHUSDT", |_| {}).unwrap();

        assert_ne!(mux.connection_state(), ConnectionState::Disconnected);
    }
}
