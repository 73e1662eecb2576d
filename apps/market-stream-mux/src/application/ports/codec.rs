//! Envelope codec port.
//!
//! The wire encoding is provider-defined. A codec turns topic-level control
//! frames into provider text and provider text back into envelopes.

use crate::domain::streaming::StreamMessage;
use crate::domain::subscription::ControlFrame;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Market data for a topic.
    Market(StreamMessage),
    /// Provider reply to a control frame.
    Reply(ControlReply),
}

/// Provider reply to a subscribe or unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Request accepted.
    Ack {
        /// Request id, for providers that echo one.
        id: Option<u64>,
        /// Provider message.
        message: Option<String>,
    },
    /// Request rejected.
    Rejected {
        /// Request id, for providers that echo one.
        id: Option<u64>,
        /// Provider error code.
        code: Option<i64>,
        /// Provider error message.
        message: String,
    },
}

/// Encodes control frames and decodes inbound envelopes.
pub trait EnvelopeCodec: Send + Sync {
    /// Short codec name for logs.
    fn name(&self) -> &'static str;

    /// Encode a control frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if serialization fails.
    fn encode_control(&self, frame: &ControlFrame) -> Result<String, CodecError>;

    /// Decode one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` for malformed frames and unrecognized kinds.
    fn decode(&self, raw: &str) -> Result<Envelope, CodecError>;

    /// Decode one inbound frame into every message it carries, in order.
    ///
    /// Providers that batch several messages per frame override this; a bad
    /// item fails on its own and does not hide its siblings.
    fn decode_all(&self, raw: &str) -> Vec<Result<Envelope, CodecError>> {
        vec![self.decode(raw)]
    }
}

/// Inbound decode failures and outbound encode failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message kind is not one this crate routes.
    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    /// Provider stream name could not be mapped to a topic.
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    /// Required field missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

impl CodecError {
    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::UnknownKind(_) => "unknown_kind",
            Self::UnknownStream(_) => "unknown_stream",
            Self::MissingField(_) => "missing_field",
            Self::InvalidFormat(_) => "invalid_format",
        }
    }
}
