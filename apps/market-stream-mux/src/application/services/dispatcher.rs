//! Inbound Dispatcher
//!
//! Decodes each inbound frame, resolves its topic, and invokes the topic's
//! listeners in registration order. A panicking listener is isolated: its
//! siblings and later frames are unaffected.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use crate::application::ports::{CodecError, ControlReply, Envelope, EnvelopeCodec, FrameHandler};
use crate::application::services::state::SubscriptionState;
use crate::domain::topic::Topic;
use crate::infrastructure::metrics;

/// A listener failure caught during dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    /// The listener panicked.
    #[error("listener for {topic} panicked: {message}")]
    Panicked {
        /// Topic being dispatched.
        topic: Topic,
        /// Panic payload, if it was a string.
        message: String,
    },
}

/// Result of dispatching one frame.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Market data delivered to the topic's listeners.
    Delivered {
        /// Resolved topic.
        topic: Topic,
        /// Listeners invoked.
        listeners: usize,
        /// Listeners that panicked.
        failures: Vec<ListenerError>,
    },
    /// Market data for a topic with no listeners.
    Unrouted(Topic),
    /// Provider control reply.
    Reply(ControlReply),
    /// Frame could not be decoded.
    Dropped(CodecError),
    /// Batched frame; one outcome per item, in order.
    Batch(Vec<DispatchOutcome>),
}

/// Routes decoded messages to listeners.
pub struct Dispatcher {
    state: Arc<SubscriptionState>,
    codec: Arc<dyn EnvelopeCodec>,
}

impl Dispatcher {
    /// Create a dispatcher over shared subscription state.
    #[must_use]
    pub fn new(state: Arc<SubscriptionState>, codec: Arc<dyn EnvelopeCodec>) -> Self {
        Self { state, codec }
    }

    /// Decode and fan out one frame.
    ///
    /// A batched frame is routed item by item in arrival order.
    pub fn dispatch(&self, raw: &str) -> DispatchOutcome {
        match <[_; 1]>::try_from(self.codec.decode_all(raw)) {
            Ok([item]) => self.route(item, raw),
            Err(items) => DispatchOutcome::Batch(
                items.into_iter().map(|item| self.route(item, raw)).collect(),
            ),
        }
    }

    fn route(&self, decoded: Result<Envelope, CodecError>, raw: &str) -> DispatchOutcome {
        let message = match decoded {
            Ok(Envelope::Market(message)) => message,
            Ok(Envelope::Reply(reply)) => {
                log_reply(&reply);
                return DispatchOutcome::Reply(reply);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    codec = self.codec.name(),
                    frame = %truncate(raw, 200),
                    "Dropping undecodable message"
                );
                metrics::record_decode_error(e.reason());
                return DispatchOutcome::Dropped(e);
            }
        };

        let topic = match Topic::new(message.kind(), message.symbol()) {
            Ok(topic) => topic,
            Err(e) => {
                let e = CodecError::InvalidFormat(e.to_string());
                tracing::warn!(error = %e, "Dropping frame without a routable topic");
                metrics::record_decode_error(e.reason());
                return DispatchOutcome::Dropped(e);
            }
        };

        let listeners = self.state.listeners_for(&topic);
        if listeners.is_empty() {
            tracing::trace!(topic = %topic, "No listeners for topic");
            return DispatchOutcome::Unrouted(topic);
        }

        let started = Instant::now();
        let mut failures = Vec::new();
        for listener in &listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(&message))) {
                let error = ListenerError::Panicked {
                    topic: topic.clone(),
                    message: panic_message(payload.as_ref()),
                };
                tracing::error!(error = %error, "Listener failed");
                metrics::record_listener_panic(topic.kind());
                failures.push(error);
            }
        }

        metrics::record_message_dispatched(topic.kind());
        metrics::record_dispatch_duration(topic.kind(), started.elapsed());

        DispatchOutcome::Delivered {
            topic,
            listeners: listeners.len(),
            failures,
        }
    }
}

impl FrameHandler for Dispatcher {
    fn on_frame(&self, raw: &str) {
        let _ = self.dispatch(raw);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("codec", &self.codec.name())
            .finish_non_exhaustive()
    }
}

fn log_reply(reply: &ControlReply) {
    match reply {
        ControlReply::Ack { id, message } => {
            tracing::debug!(id = ?id, message = ?message, "Upstream acknowledged control frame");
        }
        ControlReply::Rejected { id, code, message } => {
            tracing::warn!(id = ?id, code = ?code, message = %message, "Upstream rejected control frame");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn truncate(raw: &str, max: usize) -> &str {
    if raw.len() <= max {
        return raw;
    }
    let mut end = max;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::domain::streaming::StreamMessage;
    use crate::domain::subscription::Listener;
    use crate::domain::topic::StreamKind;
    use crate::infrastructure::codec::{EnvelopeJsonCodec, RelayCodec};

    const BTC_TRADE: &str = r#"{"kind":"trade","symbol":"BTCUSDT","timestamp":1700000000000,
        "payload":{"price":"43000","quantity":"1","side":"buy"}}"#;

    fn dispatcher() -> (Dispatcher, Arc<SubscriptionState>) {
        let state = Arc::new(SubscriptionState::new());
        let dispatcher = Dispatcher::new(Arc::clone(&state), Arc::new(EnvelopeJsonCodec::new()));
        (dispatcher, state)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Listener {
        let log = Arc::clone(log);
        Arc::new(move |msg: &StreamMessage| log.lock().push(format!("{name}:{}", msg.symbol())))
    }

    #[test]
    fn delivers_to_listeners_in_registration_order() {
        let (dispatcher, state) = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        let topic = Topic::new(StreamKind::Trade, "BTCUSDT").unwrap();
        state.register(topic.clone(), recorder(&log, "a"), |_| {});
        state.register(topic, recorder(&log, "b"), |_| {});

        let outcome = dispatcher.dispatch(BTC_TRADE);

        assert!(matches!(outcome, DispatchOutcome::Delivered { listeners: 2, .. }));
        assert_eq!(*log.lock(), vec!["a:BTCUSDT", "b:BTCUSDT"]);
    }

    #[test]
    fn panicking_listener_is_isolated() {
        let (dispatcher, state) = dispatcher();
        let log = Arc::new(Mutex::new(Vec::new()));
        let topic = Topic::new(StreamKind::Trade, "BTCUSDT").unwrap();
        state.register(topic.clone(), Arc::new(|_: &StreamMessage| panic!("boom")), |_| {});
        state.register(topic, recorder(&log, "sibling"), |_| {});

        let DispatchOutcome::Delivered { failures, .. } = dispatcher.dispatch(BTC_TRADE) else {
            panic!("expected delivery");
        };
        assert_eq!(failures.len(), 1);
        assert!(matches!(&failures[0], ListenerError::Panicked { message, .. } if message == "boom"));

        dispatcher.dispatch(BTC_TRADE);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn decode_failure_is_dropped() {
        let (dispatcher, _) = dispatcher();
        assert!(matches!(dispatcher.dispatch("{oops"), DispatchOutcome::Dropped(_)));
    }

    #[test]
    fn unknown_topic_is_unrouted() {
        let (dispatcher, _) = dispatcher();
        assert!(matches!(dispatcher.dispatch(BTC_TRADE), DispatchOutcome::Unrouted(_)));
    }

    #[test]
    fn empty_symbol_is_dropped() {
        let (dispatcher, _) = dispatcher();
        let raw = r#"{"kind":"trade","symbol":" ","timestamp":1,
            "payload":{"price":"1","quantity":"1","side":"buy"}}"#;
        assert!(matches!(dispatcher.dispatch(raw), DispatchOutcome::Dropped(_)));
    }

    #[test]
    fn replies_are_not_dispatched() {
        let (dispatcher, _) = dispatcher();
        assert!(matches!(
            dispatcher.dispatch(r#"{"status":"success","message":"ok"}"#),
            DispatchOutcome::Reply(ControlReply::Ack { .. })
        ));
    }

    #[test]
    fn batch_items_are_routed_in_order_past_a_bad_item() {
        let state = Arc::new(SubscriptionState::new());
        let dispatcher = Dispatcher::new(Arc::clone(&state), Arc::new(RelayCodec::new()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        state.register(
            Topic::new(StreamKind::Trade, "BTCUSDT").unwrap(),
            Arc::new(move |msg: &StreamMessage| {
                if let StreamMessage::Trade(trade) = msg {
                    sink.lock().push(trade.price.to_string());
                }
            }),
            |_| {},
        );
        let raw = r#"{"type":"batch","count":3,"timestamp":1,"batch":[
            {"type":"trade","symbol":"btcusdt","price":1,"quantity":1,"side":"buy","timestamp":1},
            {"type":"trade","symbol":"btcusdt","quantity":1,"timestamp":2},
            {"type":"trade","symbol":"btcusdt","price":3,"quantity":1,"side":"sell","timestamp":3}
        ]}"#;

        let DispatchOutcome::Batch(outcomes) = dispatcher.dispatch(raw) else {
            panic!("expected batch outcome");
        };

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], DispatchOutcome::Delivered { listeners: 1, .. }));
        assert!(matches!(outcomes[1], DispatchOutcome::Dropped(_)));
        assert!(matches!(outcomes[2], DispatchOutcome::Delivered { listeners: 1, .. }));
        assert_eq!(*log.lock(), vec!["1", "3"]);
    }

    #[test]
    fn empty_batch_delivers_nothing() {
        let state = Arc::new(SubscriptionState::new());
        let dispatcher = Dispatcher::new(state, Arc::new(RelayCodec::new()));
        assert!(matches!(
            dispatcher.dispatch(r#"{"type":"batch","batch":[]}"#),
            DispatchOutcome::Batch(outcomes) if outcomes.is_empty()
        ));
    }

    #[test]
    fn panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 200), "short");
    }
}
