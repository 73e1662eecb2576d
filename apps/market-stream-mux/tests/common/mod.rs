//! Shared helpers for integration tests: an in-memory upstream.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use market_stream_mux::infrastructure::connection::reconnect::{Jitter, ReconnectConfig};
use market_stream_mux::{
    ConnectionConfig, ConnectionState, EnvelopeCodec, EnvelopeJsonCodec, StreamMux, Transport,
    TransportError, TransportEvent, TransportLink,
};

/// How long to wait for something that should happen.
pub const EVENTUALLY: Duration = Duration::from_secs(2);

/// How long to watch for something that should not happen.
pub const QUIET: Duration = Duration::from_millis(60);

/// Transport handing out pre-scripted in-memory links in order.
pub struct ChannelTransport {
    links: Mutex<VecDeque<TransportLink>>,
    attempts: AtomicUsize,
}

/// The provider's side of one scripted link.
pub struct Upstream {
    /// Control frames written by the mux.
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Push frames to the mux. Dropping it closes the connection.
    pub inbound: mpsc::UnboundedSender<Result<TransportEvent, TransportError>>,
}

impl ChannelTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    /// Queue a link for the next successful `connect()`.
    pub fn script(&self) -> Upstream {
        let (out_tx, sent) = mpsc::unbounded::<String>();
        let (inbound, in_rx) = mpsc::unbounded();
        let sink = out_tx.sink_map_err(|e| TransportError::Closed(e.to_string()));
        self.links.lock().push_back(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(in_rx),
        });
        Upstream { sent, inbound }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::ConnectionFailed("no scripted link".to_string()))
    }
}

impl Upstream {
    /// Next control frame the mux wrote, parsed.
    pub async fn next_sent(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(EVENTUALLY, self.sent.next())
            .await
            .expect("no control frame sent")
            .expect("link closed");
        serde_json::from_str(&text).unwrap()
    }

    /// Assert nothing is written for a short while.
    pub async fn assert_quiet(&mut self) {
        if let Ok(Some(frame)) = tokio::time::timeout(QUIET, self.sent.next()).await {
            panic!("unexpected control frame: {frame}");
        }
    }

    /// Deliver a text frame to the mux.
    pub fn push(&self, frame: impl Into<String>) {
        self.inbound
            .unbounded_send(Ok(TransportEvent::Frame(frame.into())))
            .unwrap();
    }
}

/// Connection settings with short delays and no jitter.
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: Jitter::None,
            max_attempts: 0,
        },
        outbound_capacity: 16,
        idle_timeout: None,
    }
}

/// Mux over the given transport using the envelope codec.
pub fn mux_over(transport: &Arc<ChannelTransport>) -> StreamMux {
    mux_with(transport, fast_config(), Arc::new(EnvelopeJsonCodec::new()))
}

pub fn mux_with(
    transport: &Arc<ChannelTransport>,
    config: ConnectionConfig,
    codec: Arc<dyn EnvelopeCodec>,
) -> StreamMux {
    StreamMux::new(
        config,
        Arc::clone(transport) as Arc<dyn Transport>,
        codec,
        CancellationToken::new(),
    )
}

pub fn control(action: &str, kind: &str, symbol: &str) -> serde_json::Value {
    serde_json::json!({ "action": action, "kind": kind, "symbol": symbol })
}

pub fn trade_frame(symbol: &str, price: &str) -> String {
    serde_json::json!({
        "kind": "trade",
        "symbol": symbol,
        "timestamp": 1_700_000_000_000_i64,
        "payload": { "price": price, "quantity": "0.5", "side": "buy" }
    })
    .to_string()
}

pub fn depth_frame(symbol: &str, bid: &str, ask: &str) -> String {
    serde_json::json!({
        "kind": "depth",
        "symbol": symbol,
        "timestamp": 1_700_000_000_000_i64,
        "payload": { "update": "delta", "bids": [[bid, "1"]], "asks": [[ask, "2"]] }
    })
    .to_string()
}

pub async fn wait_for_state(mux: &StreamMux, state: ConnectionState) {
    let mut rx: watch::Receiver<ConnectionState> = mux.watch_state();
    tokio::time::timeout(EVENTUALLY, rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .expect("state channel closed");
}

/// Poll until `check` holds or fail.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENTUALLY;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
