//! Subscription Bookkeeping
//!
//! Transport-independent tracking of which listeners are interested in which
//! topics, and which topics therefore need an upstream subscription.
//!
//! # Design
//!
//! - `SubscriptionRegistry` maps each topic to its ordered listener list and
//!   reports 0→1 and 1→0 transitions, which are the only moments an upstream
//!   control frame is needed.
//! - `PendingTopicSet` is the set of topics that must be subscribed upstream
//!   (every topic with at least one live listener). It is replayed after a
//!   reconnect.
//! - `ControlFrame` is the topic-level subscribe/unsubscribe instruction handed
//!   to the connection manager.
//!
//! Neither type is synchronized; the application layer serializes access.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::domain::streaming::StreamMessage;
use crate::domain::topic::{StreamKind, Topic};

// =============================================================================
// Types
// =============================================================================

/// Identifier of a single listener registration.
pub type ListenerId = u64;

/// Type-erased listener callback.
pub type Listener = Arc<dyn Fn(&StreamMessage) + Send + Sync>;

// =============================================================================
// Control Frames
// =============================================================================

/// Upstream subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    /// Start streaming a topic.
    Subscribe,
    /// Stop streaming a topic.
    Unsubscribe,
}

impl ControlAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A subscribe or unsubscribe instruction for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControlFrame {
    /// Requested action.
    pub action: ControlAction,
    /// Target topic.
    pub topic: Topic,
}

impl ControlFrame {
    /// Subscribe frame for a topic.
    #[must_use]
    pub const fn subscribe(topic: Topic) -> Self {
        Self {
            action: ControlAction::Subscribe,
            topic,
        }
    }

    /// Unsubscribe frame for a topic.
    #[must_use]
    pub const fn unsubscribe(topic: Topic) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            topic,
        }
    }
}

impl fmt::Display for ControlFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action.as_str(), self.topic)
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Maps each topic to its active listeners.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use market_stream_mux::domain::streaming::StreamMessage;
/// use market_stream_mux::domain::subscription::{Listener, SubscriptionRegistry};
/// use market_stream_mux::domain::topic::{StreamKind, Topic};
///
/// let mut registry = SubscriptionRegistry::new();
/// let topic = Topic::new(StreamKind::Trade, "BTCUSDT").unwrap();
/// let noop: Listener = Arc::new(|_: &StreamMessage| {});
///
/// // First listener needs an upstream subscribe
/// assert!(registry.add_listener(topic.clone(), 1, Arc::clone(&noop)));
/// // Second listener shares it
/// assert!(!registry.add_listener(topic.clone(), 2, noop));
///
/// // Topic stays live until the last listener leaves
/// assert!(!registry.remove_listener(&topic, 1));
/// assert!(registry.remove_listener(&topic, 2));
/// ```
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: HashMap<Topic, Vec<(ListenerId, Listener)>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    ///
    /// Returns `true` if this is the topic's first listener (upstream
    /// subscribe needed). Re-registering an id already present is a no-op.
    pub fn add_listener(&mut self, topic: Topic, id: ListenerId, listener: Listener) -> bool {
        let listeners = self.topics.entry(topic).or_default();

        if listeners.iter().any(|(existing, _)| *existing == id) {
            return false;
        }

        listeners.push((id, listener));
        listeners.len() == 1
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the topic now has no listeners (upstream unsubscribe
    /// needed). Unknown topics or ids are a no-op returning `false`.
    pub fn remove_listener(&mut self, topic: &Topic, id: ListenerId) -> bool {
        let Some(listeners) = self.topics.get_mut(topic) else {
            return false;
        };

        let Some(position) = listeners.iter().position(|(existing, _)| *existing == id) else {
            return false;
        };

        listeners.remove(position);

        if listeners.is_empty() {
            self.topics.remove(topic);
            return true;
        }

        false
    }

    /// Ordered snapshot of a topic's listeners.
    ///
    /// The snapshot is detached from the registry: listeners added or removed
    /// while it is being iterated do not affect it.
    #[must_use]
    pub fn listeners_for(&self, topic: &Topic) -> Vec<Listener> {
        self.topics
            .get(topic)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// All topics with at least one listener.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        self.topics.keys().cloned().collect()
    }

    /// Number of live topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Number of listener registrations across all topics.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.topics.values().map(Vec::len).sum()
    }

    /// Per-kind statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();

        for (topic, listeners) in &self.topics {
            let kind = match topic.kind() {
                StreamKind::Trade => &mut stats.trades,
                StreamKind::Depth => &mut stats.depth,
            };
            kind.topic_count += 1;
            kind.listener_count += listeners.len();
        }

        stats
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topic_count())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// =============================================================================
// Pending Topic Set
// =============================================================================

/// Topics that must be subscribed upstream.
///
/// Kept sorted so resubscription after a reconnect is deterministic.
#[derive(Debug, Default, Clone)]
pub struct PendingTopicSet {
    topics: BTreeSet<Topic>,
}

impl PendingTopicSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic. Returns `true` if it was not already present.
    pub fn insert(&mut self, topic: Topic) -> bool {
        self.topics.insert(topic)
    }

    /// Remove a topic. Returns `true` if it was present.
    pub fn remove(&mut self, topic: &Topic) -> bool {
        self.topics.remove(topic)
    }

    /// Subscribe frames restoring every pending topic.
    #[must_use]
    pub fn resubscribe_frames(&self) -> Vec<ControlFrame> {
        self.topics.iter().cloned().map(ControlFrame::subscribe).collect()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for a single stream kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    /// Number of live topics.
    pub topic_count: usize,
    /// Number of listener registrations.
    pub listener_count: usize,
}

/// Registry statistics split by stream kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Trade stream stats.
    pub trades: KindStats,
    /// Depth stream stats.
    pub depth: KindStats,
}

impl RegistryStats {
    /// Total live topics.
    #[must_use]
    pub const fn total_topics(&self) -> usize {
        self.trades.topic_count + self.depth.topic_count
    }

    /// Total listener registrations.
    #[must_use]
    pub const fn total_listeners(&self) -> usize {
        self.trades.listener_count + self.depth.listener_count
    }
}

// =============================================================================
// Tests
// =============================================================================
