//! Envelope JSON codec.
//!
//! Inbound data frames:
//!
//! ```json
//! {"kind":"trade","symbol":"BTCUSDT","timestamp":1700000000000,
//!  "payload":{"price":"43000.5","quantity":"0.01","side":"buy","trade_id":7}}
//! {"kind":"depth","symbol":"ETHUSDT","timestamp":1700000000000,
//!  "payload":{"update":"snapshot","bids":[["2200.1","3"]],"asks":[["2200.2","1"]]}}
//! ```
//!
//! Control frames: `{"action":"subscribe","kind":"trade","symbol":"BTCUSDT"}`.
//! Replies: `{"status":"success","message":"..."}` or `{"error":"..."}`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::{CodecError, ControlReply, Envelope, EnvelopeCodec};
use crate::domain::streaming::{
    DepthMessage, DepthUpdate, PriceLevel, StreamMessage, TradeMessage, TradeSide,
};
use crate::domain::subscription::ControlFrame;
use crate::domain::topic::StreamKind;

/// Outbound control frame.
#[derive(Debug, Serialize)]
struct ControlRequest<'a> {
    action: &'static str,
    kind: &'static str,
    symbol: &'a str,
}

/// Inbound frame before the payload is typed.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    kind: Option<String>,
    symbol: Option<String>,
    timestamp: Option<i64>,
    payload: Option<serde_json::Value>,
    status: Option<String>,
    message: Option<String>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    price: Decimal,
    quantity: Decimal,
    side: TradeSide,
    #[serde(default)]
    trade_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DepthPayload {
    #[serde(default)]
    update: DepthUpdate,
    #[serde(default)]
    bids: Vec<PriceLevel>,
    #[serde(default)]
    asks: Vec<PriceLevel>,
    #[serde(default)]
    first_update_id: Option<u64>,
    #[serde(default)]
    final_update_id: Option<u64>,
}

/// Codec for the `{kind, symbol, payload, timestamp}` envelope.
#[derive(Debug, Default, Clone)]
pub struct EnvelopeJsonCodec;

impl EnvelopeJsonCodec {
    /// Create a new envelope codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EnvelopeCodec for EnvelopeJsonCodec {
    fn name(&self) -> &'static str {
        "envelope"
    }

    fn encode_control(&self, frame: &ControlFrame) -> Result<String, CodecError> {
        let request = ControlRequest {
            action: frame.action.as_str(),
            kind: frame.topic.kind().as_str(),
            symbol: frame.topic.symbol(),
        };
        Ok(serde_json::to_string(&request)?)
    }

    fn decode(&self, raw: &str) -> Result<Envelope, CodecError> {
        let envelope: RawEnvelope = serde_json::from_str(raw)?;

        if let Some(error) = envelope.error {
            let message = error
                .as_str()
                .map_or_else(|| error.to_string(), str::to_string);
            return Ok(Envelope::Reply(ControlReply::Rejected {
                id: None,
                code: None,
                message,
            }));
        }

        let Some(kind) = envelope.kind else {
            if envelope.status.is_some() {
                return Ok(Envelope::Reply(ControlReply::Ack {
                    id: None,
                    message: envelope.message,
                }));
            }
            return Err(CodecError::MissingField("kind"));
        };

        let kind = StreamKind::from_wire(&kind).ok_or(CodecError::UnknownKind(kind))?;
        let symbol = envelope.symbol.ok_or(CodecError::MissingField("symbol"))?;
        let timestamp = envelope.timestamp.ok_or(CodecError::MissingField("timestamp"))?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp)
            .ok_or_else(|| CodecError::InvalidFormat(format!("timestamp out of range: {timestamp}")))?;
        let payload = envelope.payload.ok_or(CodecError::MissingField("payload"))?;

        let message = match kind {
            StreamKind::Trade => {
                let trade: TradePayload = serde_json::from_value(payload)?;
                StreamMessage::Trade(TradeMessage {
                    symbol,
                    price: trade.price,
                    quantity: trade.quantity,
                    side: trade.side,
                    trade_id: trade.trade_id,
                    timestamp,
                })
            }
            StreamKind::Depth => {
                let depth: DepthPayload = serde_json::from_value(payload)?;
                StreamMessage::Depth(DepthMessage {
                    symbol,
                    update: depth.update,
                    bids: depth.bids,
                    asks: depth.asks,
                    first_update_id: depth.first_update_id,
                    final_update_id: depth.final_update_id,
                    timestamp,
                })
            }
        };

        Ok(Envelope::Market(message))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use super::*;
    use crate::domain::topic::Topic;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn codec() -> EnvelopeJsonCodec {
        EnvelopeJsonCodec::new()
    }

    #[test]
    fn encode_subscribe() {
        let frame = ControlFrame::subscribe(Topic::new(StreamKind::Trade, "btcusdt").unwrap());
        let json = codec().encode_control(&frame).unwrap();
        assert_eq!(json, r#"{"action":"subscribe","kind":"trade","symbol":"BTCUSDT"}"#);
    }

    #[test]
    fn encode_unsubscribe_depth() {
        let frame = ControlFrame::unsubscribe(Topic::new(StreamKind::Depth, "ETHUSDT").unwrap());
        let json = codec().encode_control(&frame).unwrap();
        assert_eq!(json, r#"{"action":"unsubscribe","kind":"depth","symbol":"ETHUSDT"}"#);
    }

    #[test]
    fn decode_trade() {
        let raw = r#"{"kind":"trade","symbol":"BTCUSDT","timestamp":1700000000123,
            "payload":{"price":"43000.5","quantity":0.25,"side":"sell","trade_id":99}}"#;

        let Envelope::Market(StreamMessage::Trade(trade)) = codec().decode(raw).unwrap() else {
            panic!("expected trade");
        };
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.price, dec("43000.5"));
        assert_eq!(trade.quantity, dec("0.25"));
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.trade_id, Some(99));
        assert_eq!(trade.timestamp.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn decode_depth_snapshot() {
        let raw = r#"{"kind":"depth","symbol":"ETHUSDT","timestamp":1700000000000,
            "payload":{"update":"snapshot","bids":[["2200.1","3"],["2200.0","1"]],"asks":[["2200.2","1.5"]]}}"#;

        let Envelope::Market(StreamMessage::Depth(depth)) = codec().decode(raw).unwrap() else {
            panic!("expected depth");
        };
        assert_eq!(depth.update, DepthUpdate::Snapshot);
        assert_eq!(depth.bids.len(), 2);
        assert_eq!(depth.best_ask().unwrap().price, dec("2200.2"));
        assert_eq!(depth.first_update_id, None);
    }

    #[test]
    fn decode_status_reply() {
        let raw = r#"{"status":"success","message":"Subscribed to trade:BTCUSDT"}"#;
        assert_eq!(
            codec().decode(raw).unwrap(),
            Envelope::Reply(ControlReply::Ack {
                id: None,
                message: Some("Subscribed to trade:BTCUSDT".to_string()),
            })
        );
    }

    #[test]
    fn decode_error_reply() {
        let raw = r#"{"error":"Invalid message format"}"#;
        assert!(matches!(
            codec().decode(raw).unwrap(),
            Envelope::Reply(ControlReply::Rejected { message, .. }) if message == "Invalid message format"
        ));
    }

    #[test_case("not json", "json" ; "malformed json")]
    #[test_case(r#"{"kind":"ticker","symbol":"X","timestamp":1,"payload":{}}"#, "unknown_kind" ; "unknown kind")]
    #[test_case(r#"{"symbol":"X","timestamp":1,"payload":{}}"#, "missing_field" ; "missing kind")]
    #[test_case(r#"{"kind":"trade","timestamp":1,"payload":{}}"#, "missing_field" ; "missing symbol")]
    #[test_case(r#"{"kind":"trade","symbol":"X","payload":{}}"#, "missing_field" ; "missing timestamp")]
    #[test_case(r#"{"kind":"trade","symbol":"X","timestamp":1}"#, "missing_field" ; "missing payload")]
    #[test_case(r#"{"kind":"trade","symbol":"X","timestamp":1,"payload":{"price":"1"}}"#, "json" ; "bad trade payload")]
    #[test_case(r#"{"kind":"depth","symbol":"X","timestamp":1,"payload":{"bids":[["x","1"]]}}"#, "json" ; "bad depth level")]
    fn decode_failures(raw: &str, reason: &str) {
        let err = codec().decode(raw).unwrap_err();
        assert_eq!(err.reason(), reason, "{err}");
    }
}
