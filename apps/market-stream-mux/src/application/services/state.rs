//! Shared subscription state.
//!
//! The registry and the pending-topic set live behind one lock so that
//! listener bookkeeping and the resulting control frames are ordered together.

use parking_lot::Mutex;

use crate::application::ports::ResyncSource;
use crate::domain::subscription::{
    ControlFrame, Listener, ListenerId, PendingTopicSet, RegistryStats, SubscriptionRegistry,
};
use crate::domain::topic::Topic;
use crate::infrastructure::metrics;

#[derive(Debug, Default)]
struct Inner {
    registry: SubscriptionRegistry,
    pending: PendingTopicSet,
    next_id: ListenerId,
}

/// Listener registry plus upstream interest, serialized by one mutex.
#[derive(Debug, Default)]
pub struct SubscriptionState {
    inner: Mutex<Inner>,
}

impl SubscriptionState {
    /// Create empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    ///
    /// When this is the topic's first listener, `on_first` receives the
    /// subscribe frame while the lock is still held.
    pub fn register<F>(&self, topic: Topic, listener: Listener, on_first: F) -> ListenerId
    where
        F: FnOnce(ControlFrame),
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        if inner.registry.add_listener(topic.clone(), id, listener) {
            inner.pending.insert(topic.clone());
            on_first(ControlFrame::subscribe(topic));
        }

        let stats = inner.registry.stats();
        drop(inner);
        metrics::set_subscriptions(stats.total_topics(), stats.total_listeners());
        id
    }

    /// Remove a listener.
    ///
    /// When this empties the topic, `on_last` receives the unsubscribe frame
    /// while the lock is still held. Returns `true` in that case.
    pub fn unregister<F>(&self, topic: &Topic, id: ListenerId, on_last: F) -> bool
    where
        F: FnOnce(ControlFrame),
    {
        let mut inner = self.inner.lock();
        let became_empty = inner.registry.remove_listener(topic, id);
        if became_empty {
            inner.pending.remove(topic);
            on_last(ControlFrame::unsubscribe(topic.clone()));
        }

        let stats = inner.registry.stats();
        drop(inner);
        metrics::set_subscriptions(stats.total_topics(), stats.total_listeners());
        became_empty
    }

    /// Snapshot of a topic's listeners.
    #[must_use]
    pub fn listeners_for(&self, topic: &Topic) -> Vec<Listener> {
        self.inner.lock().registry.listeners_for(topic)
    }

    /// Topics with at least one listener.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        self.inner.lock().registry.topics()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.inner.lock().registry.stats()
    }
}

impl ResyncSource for SubscriptionState {
    fn pending_frames(&self) -> Vec<ControlFrame> {
        self.inner.lock().pending.resubscribe_frames()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::streaming::StreamMessage;
    use crate::domain::topic::StreamKind;

    fn noop() -> Listener {
        Arc::new(|_: &StreamMessage| {})
    }

    #[test]
    fn first_and_last_listener_emit_frames() {
        let state = SubscriptionState::new();
        let topic = Topic::new(StreamKind::Trade, "BTCUSDT").unwrap();
        let mut frames = Vec::new();

        let a = state.register(topic.clone(), noop(), |f| frames.push(f));
        let b = state.register(topic.clone(), noop(), |f| frames.push(f));
        assert_ne!(a, b);
        assert_eq!(frames, vec![ControlFrame::subscribe(topic.clone())]);
        assert_eq!(state.pending_frames(), vec![ControlFrame::subscribe(topic.clone())]);

        assert!(!state.unregister(&topic, a, |f| frames.push(f)));
        assert!(state.unregister(&topic, b, |f| frames.push(f)));
        assert_eq!(frames.last(), Some(&ControlFrame::unsubscribe(topic)));
        assert!(state.pending_frames().is_empty());
    }

    #[test]
    fn unknown_listener_is_noop() {
        let state = SubscriptionState::new();
        let topic = Topic::new(StreamKind::Depth, "ETHUSDT").unwrap();
        let mut called = false;

        assert!(!state.unregister(&topic, 42, |_| called = true));
        assert!(!called);
        assert!(state.topics().is_empty());
    }
}
