//! Stream Topics
//!
//! A topic names one logical upstream stream: a message kind plus a symbol.
//! Topics are the registry key, so two topics with the same kind and symbol
//! are the same subscription no matter how many listeners share it.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Stream Kind
// =============================================================================

/// Kind of market data carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Executed trades.
    Trade,
    /// Order book snapshots and deltas.
    Depth,
}

impl StreamKind {
    /// Get all stream kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Trade, Self::Depth]
    }

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Depth => "depth",
        }
    }

    /// Parse a wire name. Returns `None` for kinds this crate does not route.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "trade" => Some(Self::Trade),
            "depth" => Some(Self::Depth),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Topic
// =============================================================================

/// Immutable (kind, symbol) pair identifying one upstream stream.
///
/// Symbols are trimmed and upper-cased on construction, so `"btcusdt"` and
/// `"BTCUSDT"` resolve to the same topic.
///
/// # Example
///
/// ```rust
/// use market_stream_mux::domain::topic::{StreamKind, Topic};
///
/// let a = Topic::new(StreamKind::Trade, "btcusdt").unwrap();
/// let b = Topic::new(StreamKind::Trade, " BTCUSDT ").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "trade:BTCUSDT");
///
/// assert!(Topic::new(StreamKind::Depth, "").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic {
    kind: StreamKind,
    symbol: String,
}

impl Topic {
    /// Build a topic, validating the symbol.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidTopic`] if the symbol is empty or
    /// whitespace only.
    pub fn new(kind: StreamKind, symbol: &str) -> Result<Self, SubscriptionError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(SubscriptionError::InvalidTopic(format!(
                "empty symbol for {kind} stream"
            )));
        }

        Ok(Self {
            kind,
            symbol: symbol.to_ascii_uppercase(),
        })
    }

    /// Stream kind.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Normalized symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.symbol)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors returned synchronously to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Subscribe arguments do not name a valid topic. Nothing was mutated.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// The process-wide multiplexer has not been initialized.
    #[error("stream multiplexer not initialized")]
    NotInitialized,

    /// The process-wide multiplexer was already initialized.
    #[error("stream multiplexer already initialized")]
    AlreadyInitialized,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn topic_equality_by_value() {
        let a = Topic::new(StreamKind::Trade, "BTCUSDT").unwrap();
        let b = Topic::new(StreamKind::Trade, "BTCUSDT").unwrap();
        let c = Topic::new(StreamKind::Depth, "BTCUSDT").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn topic_normalizes_symbol() {
        let topic = Topic::new(StreamKind::Depth, "  ethusdt\t").unwrap();
        assert_eq!(topic.symbol(), "ETHUSDT");
        assert_eq!(topic.kind(), StreamKind::Depth);
    }

    #[test]
    fn empty_symbol_is_invalid() {
        assert!(matches!(
            Topic::new(StreamKind::Trade, ""),
            Err(SubscriptionError::InvalidTopic(_))
        ));
        assert!(matches!(
            Topic::new(StreamKind::Trade, "   "),
            Err(SubscriptionError::InvalidTopic(_))
        ));
    }

    #[test]
    fn stream_kind_wire_names() {
        for kind in StreamKind::all() {
            assert_eq!(StreamKind::from_wire(kind.as_str()), Some(*kind));
        }
        assert_eq!(StreamKind::from_wire("kline"), None);
        assert_eq!(
            serde_json::to_string(&StreamKind::Depth).unwrap(),
            "\"depth\""
        );
    }

    #[test]
    fn topic_display() {
        let topic = Topic::new(StreamKind::Trade, "solusdt").unwrap();
        assert_eq!(topic.to_string(), "trade:SOLUSDT");
    }
}
