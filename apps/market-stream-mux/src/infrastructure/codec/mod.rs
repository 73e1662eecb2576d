//! Envelope Codecs
//!
//! Provider wire formats behind the `EnvelopeCodec` port.
//!
//! - **Envelope JSON**: `{kind, symbol, payload, timestamp}` frames with
//!   `{action, kind, symbol}` control messages
//! - **Binance**: combined market streams with `SUBSCRIBE`/`UNSUBSCRIBE` calls
//! - **Relay**: flat, optionally batched messages with `{action, channel}`
//!   control messages

mod binance;
mod envelope;
mod relay;

use std::sync::Arc;

pub use binance::BinanceCodec;
pub use envelope::EnvelopeJsonCodec;
pub use relay::RelayCodec;

use crate::application::ports::EnvelopeCodec;
use crate::infrastructure::config::CodecKind;

/// Build the codec selected by configuration.
#[must_use]
pub fn build_codec(kind: CodecKind) -> Arc<dyn EnvelopeCodec> {
    match kind {
        CodecKind::Envelope => Arc::new(EnvelopeJsonCodec::new()),
        CodecKind::Binance => Arc::new(BinanceCodec::new()),
        CodecKind::Relay => Arc::new(RelayCodec::new()),
    }
}
