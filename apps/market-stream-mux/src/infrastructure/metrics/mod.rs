//! Prometheus Metrics Module
//!
//! Exposes multiplexer metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Inbound frames, dispatched messages, decode failures
//! - **Control**: Subscribe/unsubscribe frames sent and dropped
//! - **Connection**: Upstream state and reconnect attempts
//! - **Subscriptions**: Live topic and listener counts
//! - **Latency**: Fan-out duration per message
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until a recorder is installed.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::subscription::ControlAction;
use crate::domain::topic::StreamKind;
use crate::infrastructure::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Inbound
    describe_counter!(
        "stream_mux_frames_received_total",
        "Total frames received from the upstream connection"
    );
    describe_counter!(
        "stream_mux_messages_dispatched_total",
        "Total market data messages delivered to at least one listener"
    );
    describe_counter!(
        "stream_mux_decode_errors_total",
        "Total inbound frames dropped because they could not be decoded"
    );
    describe_counter!(
        "stream_mux_listener_panics_total",
        "Total listener invocations that panicked"
    );

    // Control
    describe_counter!(
        "stream_mux_control_frames_sent_total",
        "Total subscribe/unsubscribe frames written upstream"
    );
    describe_counter!(
        "stream_mux_control_frames_dropped_total",
        "Total control frames evicted from a full outbound queue"
    );

    // Connection
    describe_counter!(
        "stream_mux_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_gauge!(
        "stream_mux_connection_state",
        "Upstream connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting)"
    );

    // Subscriptions
    describe_gauge!("stream_mux_active_topics", "Topics with at least one listener");
    describe_gauge!("stream_mux_active_listeners", "Registered listeners");

    // Latency
    describe_histogram!(
        "stream_mux_dispatch_seconds",
        "Time to fan one message out to its listeners"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame received from upstream.
pub fn record_frame_received() {
    counter!("stream_mux_frames_received_total").increment(1);
}

/// Record a message delivered to listeners.
pub fn record_message_dispatched(kind: StreamKind) {
    counter!(
        "stream_mux_messages_dispatched_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record an inbound frame dropped by the codec.
pub fn record_decode_error(reason: &'static str) {
    counter!(
        "stream_mux_decode_errors_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a listener panic.
pub fn record_listener_panic(kind: StreamKind) {
    counter!(
        "stream_mux_listener_panics_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a control frame written upstream.
pub fn record_control_frame_sent(action: ControlAction) {
    counter!(
        "stream_mux_control_frames_sent_total",
        "action" => action.as_str()
    )
    .increment(1);
}

/// Record a control frame evicted from the outbound queue.
pub fn record_control_frame_dropped() {
    counter!("stream_mux_control_frames_dropped_total").increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("stream_mux_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("stream_mux_connection_state").set(f64::from(state.metric_value()));
}

/// Update live topic and listener gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(topics: usize, listeners: usize) {
    gauge!("stream_mux_active_topics").set(topics as f64);
    gauge!("stream_mux_active_listeners").set(listeners as f64);
}

/// Record fan-out duration for one message.
pub fn record_dispatch_duration(kind: StreamKind, duration: Duration) {
    histogram!(
        "stream_mux_dispatch_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_message_dispatched(StreamKind::Trade);
        record_decode_error("json");
        record_control_frame_sent(ControlAction::Subscribe);
        set_connection_state(ConnectionState::Connected);
        set_subscriptions(2, 3);
        record_dispatch_duration(StreamKind::Depth, Duration::from_micros(5));
    }

    #[test]
    fn init_metrics_is_idempotent() {
        let first = init_metrics().unwrap();
        let second = init_metrics().unwrap();
        record_reconnect();
        assert!(second.render().contains("stream_mux_reconnects_total"));
        drop(first);
    }
}
