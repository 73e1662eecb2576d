//! Port Interfaces
//!
//! Defines the interfaces (ports) between the subscription core and the
//! outside world, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: opens the upstream streaming connection
//! - `EnvelopeCodec`: encodes control frames and decodes inbound envelopes
//!
//! ## Driver Ports (Inbound)
//!
//! - `FrameHandler`: receives every inbound frame in arrival order
//! - `ResyncSource`: supplies the subscriptions to restore on a new connection

mod codec;
mod transport;

pub use codec::{CodecError, ControlReply, Envelope, EnvelopeCodec};
pub use transport::{FrameSink, FrameStream, Transport, TransportError, TransportEvent, TransportLink};

use crate::domain::subscription::ControlFrame;

/// Consumer of raw inbound frames.
///
/// Called on the connection task, one frame at a time, in arrival order.
pub trait FrameHandler: Send + Sync {
    /// Handle one inbound frame. Must not fail the connection.
    fn on_frame(&self, raw: &str);
}

/// Source of the subscriptions that must exist on a fresh connection.
#[cfg_attr(test, mockall::automock)]
pub trait ResyncSource: Send + Sync {
    /// Subscribe frames for every topic that currently has a live listener.
    fn pending_frames(&self) -> Vec<ControlFrame>;
}
