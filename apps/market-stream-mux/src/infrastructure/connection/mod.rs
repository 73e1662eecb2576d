//! Upstream Connection Manager
//!
//! Owns the single streaming connection shared by every subscription.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake ok--> Connected
//!      ^                          |                           |
//!      |                     handshake failed          close / error / idle
//!      |                          v                           |
//!      +--attempts exhausted-- Reconnecting <-----------------+
//! ```
//!
//! The driver task is spawned lazily by the first `connect()`. On every
//! successful handshake it resubscribes the live topics, then flushes the
//! queued control frames, suppressing any frame that would not change the
//! set of topics subscribed on that connection. When the outbound queue
//! overflows, the next flush first reconciles that set against the live
//! topics, so evicted frames never leave a topic unsubscribed.

pub mod outbound;
pub mod reconnect;
pub mod websocket;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use self::outbound::{DEFAULT_OUTBOUND_CAPACITY, OutboundQueue};
use self::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    EnvelopeCodec, FrameHandler, FrameSink, ResyncSource, Transport, TransportError,
    TransportEvent, TransportLink,
};
use crate::domain::subscription::{ControlAction, ControlFrame};
use crate::domain::topic::Topic;
use crate::infrastructure::config::ConnectionSettings;
use crate::infrastructure::metrics;

/// Default idle timeout before a silent connection is recycled.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Connection State
// =============================================================================

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No driver running.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake complete; frames flowing.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Gauge encoding of the state.
    #[must_use]
    pub const fn metric_value(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectConfig,
    /// Outbound control-frame queue capacity.
    pub outbound_capacity: usize,
    /// Recycle the connection after this long without inbound traffic.
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration from `ConnectionSettings`.
    #[must_use]
    pub const fn from_connection_settings(settings: &ConnectionSettings) -> Self {
        Self {
            reconnect: ReconnectConfig::from_connection_settings(settings),
            outbound_capacity: settings.outbound_capacity,
            idle_timeout: settings.idle_timeout,
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Single upstream connection with reconnect and an outbound control queue.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn EnvelopeCodec>,
    handler: Arc<dyn FrameHandler>,
    resync: Arc<dyn ResyncSource>,
    outbound: Mutex<OutboundQueue>,
    outbound_ready: Notify,
    connect_now: Notify,
    state: watch::Sender<ConnectionState>,
    /// Whether a driver task is running. Guards start and exit together.
    driver_active: Mutex<bool>,
    /// A `connect()` arrived while the driver was not connected.
    connect_requested: AtomicBool,
    /// Frames were evicted; reconcile before the next flush.
    resync_needed: AtomicBool,
    runtime: Option<Handle>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager. No connection is opened until `connect()`.
    ///
    /// The current Tokio runtime, if any, is captured for spawning the driver.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn EnvelopeCodec>,
        handler: Arc<dyn FrameHandler>,
        resync: Arc<dyn ResyncSource>,
        cancel: CancellationToken,
    ) -> Self {
        let outbound = OutboundQueue::new(config.outbound_capacity);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                codec,
                handler,
                resync,
                outbound: Mutex::new(outbound),
                outbound_ready: Notify::new(),
                connect_now: Notify::new(),
                state,
                driver_active: Mutex::new(false),
                connect_requested: AtomicBool::new(false),
                resync_needed: AtomicBool::new(false),
                runtime: Handle::try_current().ok(),
                cancel,
            }),
        }
    }

    /// Ensure the connection is up or on its way up.
    ///
    /// Starts the driver when disconnected and cuts a pending backoff short
    /// when reconnecting. Otherwise a no-op.
    pub fn connect(&self) {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            tracing::debug!("connect() after cancellation ignored");
            return;
        }

        let mut active = shared.driver_active.lock();
        if *active {
            let state = *shared.state.borrow();
            if state != ConnectionState::Connected {
                shared.connect_requested.store(true, Ordering::Release);
            }
            if state == ConnectionState::Reconnecting {
                tracing::debug!("connect() while reconnecting, retrying now");
                shared.connect_now.notify_one();
            }
            return;
        }

        let Some(runtime) = shared.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::error!("connect() called without a Tokio runtime; connection not started");
            return;
        };

        *active = true;
        shared.connect_requested.store(false, Ordering::Release);
        shared.set_state(ConnectionState::Connecting);
        runtime.spawn(Arc::clone(shared).drive());
    }

    /// Queue a control frame for the upstream connection.
    ///
    /// Frames are flushed in order while connected. On overflow the oldest
    /// queued frame is dropped.
    pub fn send(&self, frame: ControlFrame) {
        let evicted = {
            let mut queue = self.shared.outbound.lock();
            let evicted = queue.push(frame);
            evicted.map(|dropped| (dropped, queue.capacity()))
        };

        if let Some((dropped, capacity)) = evicted {
            tracing::warn!(
                frame = %dropped,
                capacity,
                "Outbound queue full, dropped oldest control frame"
            );
            metrics::record_control_frame_dropped();
            self.shared.resync_needed.store(true, Ordering::Release);
        }

        self.shared.outbound_ready.notify_one();
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Number of control frames waiting to be flushed.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.shared.outbound.lock().len()
    }

    /// Control frames evicted by queue overflow since creation.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.shared.outbound.lock().dropped_total()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("codec", &self.shared.codec.name())
            .field("queued_frames", &self.queued_frames())
            .field("dropped_frames", &self.dropped_frames())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Driver
// =============================================================================

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!(state = %next, "Connection state changed");
            metrics::set_connection_state(next);
        }
    }

    /// Connect, run, and reconnect until cancelled or out of attempts.
    async fn drive(self: Arc<Self>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            self.run_until_exhausted(&mut policy).await;
            if self.finish() {
                break;
            }
            tracing::info!("Connect requested while giving up, starting over");
            policy.reset();
        }
    }

    async fn run_until_exhausted(&self, policy: &mut ReconnectPolicy) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = self.transport.connect() => result,
            };

            match connected {
                Ok(link) => {
                    policy.reset();
                    self.connect_requested.store(false, Ordering::Release);
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(codec = self.codec.name(), "Upstream connected");

                    match self.run_session(link).await {
                        Ok(()) => return,
                        Err(e) => tracing::warn!(error = %e, "Upstream connection lost"),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt = policy.attempt_count(),
                        "Upstream connection failed"
                    );
                }
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    attempts = policy.attempt_count(),
                    "Maximum reconnection attempts exceeded"
                );
                return;
            };

            self.set_state(ConnectionState::Reconnecting);
            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to upstream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
                () = self.connect_now.notified() => {}
            }
        }
    }

    /// Mark the driver stopped. Returns `false` if a `connect()` arrived
    /// since the last successful handshake and the driver must keep going.
    fn finish(&self) -> bool {
        let mut active = self.driver_active.lock();
        if self.cancel.is_cancelled() {
            tracing::info!("Connection manager cancelled");
        } else if self.connect_requested.swap(false, Ordering::AcqRel) {
            return false;
        }

        self.set_state(ConnectionState::Disconnected);
        *active = false;
        true
    }

    /// Run one connection. `Ok` means cancelled; `Err` means reconnect.
    async fn run_session(&self, link: TransportLink) -> Result<(), TransportError> {
        let TransportLink {
            mut sink,
            mut stream,
        } = link;
        let mut upstream = HashSet::new();

        self.resync_needed.store(false, Ordering::Release);
        let resync = self.reconcile(&upstream);
        if !resync.is_empty() {
            tracing::info!(topics = resync.len(), "Resubscribing live topics");
        }
        self.transmit(&mut sink, &mut upstream, resync).await?;

        let backlog = self.outbound.lock().drain();
        self.transmit(&mut sink, &mut upstream, backlog).await?;

        let idle_timeout = self.config.idle_timeout;
        let mut idle_deadline = idle_timeout.map(|timeout| Instant::now() + timeout);

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(());
                }
                () = self.outbound_ready.notified() => {
                    self.flush(&mut sink, &mut upstream).await?;
                }
                event = stream.next() => {
                    if let Some(timeout) = idle_timeout {
                        idle_deadline = Some(Instant::now() + timeout);
                    }

                    match event {
                        Some(Ok(TransportEvent::Frame(text))) => {
                            metrics::record_frame_received();
                            self.handler.on_frame(&text);
                        }
                        Some(Ok(TransportEvent::Heartbeat)) => {
                            tracing::trace!("Upstream heartbeat");
                        }
                        Some(Err(e)) => return Err(e),
                        None => return Err(TransportError::Closed("stream ended".to_string())),
                    }
                }
                () = idle_expired(idle_deadline) => {
                    return Err(TransportError::IdleTimeout(idle_timeout.unwrap_or_default()));
                }
            }
        }
    }

    /// Send queued frames, reconciling first if any were evicted.
    async fn flush(
        &self,
        sink: &mut FrameSink,
        upstream: &mut HashSet<Topic>,
    ) -> Result<(), TransportError> {
        if self.resync_needed.swap(false, Ordering::AcqRel) {
            let frames = self.reconcile(upstream);
            tracing::info!(
                frames = frames.len(),
                "Reconciling upstream subscriptions after queue overflow"
            );
            self.transmit(sink, upstream, frames).await?;
        }

        let frames = self.outbound.lock().drain();
        self.transmit(sink, upstream, frames).await
    }

    /// Frames that bring `upstream` in line with the live topics: stale
    /// unsubscribes first, then missing subscribes, each sorted.
    fn reconcile(&self, upstream: &HashSet<Topic>) -> Vec<ControlFrame> {
        let live: BTreeSet<Topic> = self
            .resync
            .pending_frames()
            .into_iter()
            .filter(|frame| frame.action == ControlAction::Subscribe)
            .map(|frame| frame.topic)
            .collect();

        let mut stale: Vec<Topic> = upstream
            .iter()
            .filter(|topic| !live.contains(*topic))
            .cloned()
            .collect();
        stale.sort();

        stale
            .into_iter()
            .map(ControlFrame::unsubscribe)
            .chain(
                live.into_iter()
                    .filter(|topic| !upstream.contains(topic))
                    .map(ControlFrame::subscribe),
            )
            .collect()
    }

    /// Write frames, skipping those that would not change `upstream`.
    async fn transmit(
        &self,
        sink: &mut FrameSink,
        upstream: &mut HashSet<Topic>,
        frames: Vec<ControlFrame>,
    ) -> Result<(), TransportError> {
        for frame in frames {
            let changes_upstream = match frame.action {
                ControlAction::Subscribe => upstream.insert(frame.topic.clone()),
                ControlAction::Unsubscribe => upstream.remove(&frame.topic),
            };
            if !changes_upstream {
                tracing::trace!(frame = %frame, "Suppressed redundant control frame");
                continue;
            }

            let text = match self.codec.encode_control(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(frame = %frame, error = %e, "Failed to encode control frame");
                    continue;
                }
            };

            sink.send(text).await?;
            metrics::record_control_frame_sent(frame.action);
            tracing::debug!(frame = %frame, "Sent control frame");
        }
        Ok(())
    }
}

async fn idle_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Tests
// =============================================================================
