//! Binance combined-stream codec.
//!
//! Inbound frames arrive wrapped as `{"stream":"btcusdt@trade","data":{...}}`
//! on the `/stream` endpoint, or as the bare event on `/ws`. Control frames
//! use the `SUBSCRIBE`/`UNSUBSCRIBE` method calls with a per-codec request id.
//!
//! Prices and quantities are decimal strings. The trade side is derived from
//! the buyer-maker flag: `m = true` means the seller was the aggressor.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::{CodecError, ControlReply, Envelope, EnvelopeCodec};
use crate::domain::streaming::{
    DepthMessage, DepthUpdate, PriceLevel, StreamMessage, TradeMessage, TradeSide,
};
use crate::domain::subscription::{ControlAction, ControlFrame};
use crate::domain::topic::{StreamKind, Topic};

/// Depth stream update speed requested on subscribe.
const DEPTH_STREAM_SUFFIX: &str = "depth@100ms";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct MethodCall {
    method: &'static str,
    params: Vec<String>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct MethodError {
    code: Option<i64>,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum MarketEvent {
    #[serde(rename = "trade")]
    Trade(TradeEvent),
    #[serde(rename = "depthUpdate")]
    Depth(DepthEvent),
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: Option<u64>,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct DepthEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: Option<u64>,
    #[serde(rename = "u")]
    final_update_id: Option<u64>,
    #[serde(rename = "b", default)]
    bids: Vec<PriceLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<PriceLevel>,
}

// =============================================================================
// Codec
// =============================================================================

/// Codec for Binance combined market streams.
#[derive(Debug)]
pub struct BinanceCodec {
    next_id: AtomicU64,
}

impl Default for BinanceCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceCodec {
    /// Create a new Binance codec. Request ids start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Binance stream name for a topic, e.g. `btcusdt@depth@100ms`.
    #[must_use]
    pub fn stream_name(topic: &Topic) -> String {
        let symbol = topic.symbol().to_ascii_lowercase();
        match topic.kind() {
            StreamKind::Trade => format!("{symbol}@trade"),
            StreamKind::Depth => format!("{symbol}@{DEPTH_STREAM_SUFFIX}"),
        }
    }

    /// Map a stream name back to its kind and symbol.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::UnknownStream` for streams this crate does not route.
    pub fn parse_stream_name(stream: &str) -> Result<(StreamKind, String), CodecError> {
        let mut parts = stream.split('@');
        let symbol = parts.next().filter(|s| !s.is_empty());
        let kind = match parts.next() {
            Some("trade") => Some(StreamKind::Trade),
            Some("depth") => Some(StreamKind::Depth),
            _ => None,
        };

        match (symbol, kind) {
            (Some(symbol), Some(kind)) => Ok((kind, symbol.to_ascii_uppercase())),
            _ => Err(CodecError::UnknownStream(stream.to_string())),
        }
    }

    fn decode_event(data: serde_json::Value) -> Result<StreamMessage, CodecError> {
        match data.get("e").and_then(serde_json::Value::as_str) {
            Some("trade" | "depthUpdate") => {}
            Some(other) => return Err(CodecError::UnknownKind(other.to_string())),
            None => return Err(CodecError::MissingField("e")),
        }

        let message = match serde_json::from_value::<MarketEvent>(data)? {
            MarketEvent::Trade(trade) => StreamMessage::Trade(TradeMessage {
                symbol: trade.symbol,
                price: trade.price,
                quantity: trade.quantity,
                side: if trade.buyer_is_maker {
                    TradeSide::Sell
                } else {
                    TradeSide::Buy
                },
                trade_id: trade.trade_id,
                timestamp: from_millis(trade.trade_time)?,
            }),
            MarketEvent::Depth(depth) => StreamMessage::Depth(DepthMessage {
                symbol: depth.symbol,
                update: DepthUpdate::Delta,
                bids: depth.bids,
                asks: depth.asks,
                first_update_id: depth.first_update_id,
                final_update_id: depth.final_update_id,
                timestamp: from_millis(depth.event_time)?,
            }),
        };
        Ok(message)
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, CodecError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| CodecError::InvalidFormat(format!("timestamp out of range: {ms}")))
}

impl EnvelopeCodec for BinanceCodec {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn encode_control(&self, frame: &ControlFrame) -> Result<String, CodecError> {
        let call = MethodCall {
            method: match frame.action {
                ControlAction::Subscribe => "SUBSCRIBE",
                ControlAction::Unsubscribe => "UNSUBSCRIBE",
            },
            params: vec![Self::stream_name(&frame.topic)],
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        Ok(serde_json::to_string(&call)?)
    }

    fn decode(&self, raw: &str) -> Result<Envelope, CodecError> {
        let mut value: serde_json::Value = serde_json::from_str(raw)?;
        let Some(object) = value.as_object_mut() else {
            return Err(CodecError::InvalidFormat("expected JSON object".to_string()));
        };

        let id = object.get("id").and_then(serde_json::Value::as_u64);

        if let Some(error) = object.remove("error") {
            let error: MethodError = serde_json::from_value(error)?;
            return Ok(Envelope::Reply(ControlReply::Rejected {
                id,
                code: error.code,
                message: error.msg,
            }));
        }

        if object.contains_key("result") {
            return Ok(Envelope::Reply(ControlReply::Ack { id, message: None }));
        }

        let stream = object
            .get("stream")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        let message = if let Some(stream) = stream {
            let (kind, symbol) = Self::parse_stream_name(&stream)?;
            let data = object.remove("data").ok_or(CodecError::MissingField("data"))?;
            let message = Self::decode_event(data)?;
            if message.kind() != kind || !message.symbol().eq_ignore_ascii_case(&symbol) {
                return Err(CodecError::InvalidFormat(format!(
                    "stream {stream} carried {} for {}",
                    message.kind(),
                    message.symbol()
                )));
            }
            message
        } else {
            Self::decode_event(value)?
        };

        Ok(Envelope::Market(message))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    const TRADE: &str = r#"{"stream":"btcusdt@trade","data":{"e":"trade","E":1700000000100,
        "s":"BTCUSDT","t":12345,"p":"43000.10","q":"0.002","b":88,"a":50,
        "T":1700000000099,"m":true,"M":true}}"#;

    const DEPTH: &str = r#"{"stream":"ethusdt@depth@100ms","data":{"e":"depthUpdate",
        "E":1700000000200,"T":1700000000198,"s":"ETHUSDT","U":100,"u":105,"pu":99,
        "b":[["2200.10","4.5"],["2200.00","0"]],"a":[["2200.20","1.25"]]}}"#;

    #[test]
    fn encode_uses_incrementing_ids() {
        let codec = BinanceCodec::new();
        let topic = Topic::new(StreamKind::Trade, "BTCUSDT").unwrap();

        let first = codec.encode_control(&ControlFrame::subscribe(topic.clone())).unwrap();
        let second = codec.encode_control(&ControlFrame::unsubscribe(topic)).unwrap();

        assert_eq!(first, r#"{"method":"SUBSCRIBE","params":["btcusdt@trade"],"id":1}"#);
        assert_eq!(second, r#"{"method":"UNSUBSCRIBE","params":["btcusdt@trade"],"id":2}"#);
    }

    #[test]
    fn depth_stream_name() {
        let topic = Topic::new(StreamKind::Depth, "ethusdt").unwrap();
        assert_eq!(BinanceCodec::stream_name(&topic), "ethusdt@depth@100ms");
    }

    #[test_case("btcusdt@trade", StreamKind::Trade, "BTCUSDT" ; "trade")]
    #[test_case("ethusdt@depth", StreamKind::Depth, "ETHUSDT" ; "depth")]
    #[test_case("ethusdt@depth@100ms", StreamKind::Depth, "ETHUSDT" ; "depth with speed")]
    fn parse_stream_names(stream: &str, kind: StreamKind, symbol: &str) {
        assert_eq!(
            BinanceCodec::parse_stream_name(stream).unwrap(),
            (kind, symbol.to_string())
        );
    }

    #[test_case("btcusdt@kline_1m" ; "kline")]
    #[test_case("@trade" ; "empty symbol")]
    #[test_case("btcusdt" ; "no channel")]
    fn reject_unknown_streams(stream: &str) {
        assert!(matches!(
            BinanceCodec::parse_stream_name(stream),
            Err(CodecError::UnknownStream(_))
        ));
    }

    #[test]
    fn decode_trade_buyer_maker_is_sell() {
        let Envelope::Market(StreamMessage::Trade(trade)) = BinanceCodec::new().decode(TRADE).unwrap()
        else {
            panic!("expected trade");
        };
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.price, dec("43000.10"));
        assert_eq!(trade.quantity, dec("0.002"));
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.trade_id, Some(12345));
        assert_eq!(trade.timestamp.timestamp_millis(), 1_700_000_000_099);
    }

    #[test]
    fn decode_depth_update() {
        let Envelope::Market(StreamMessage::Depth(depth)) = BinanceCodec::new().decode(DEPTH).unwrap()
        else {
            panic!("expected depth");
        };
        assert_eq!(depth.symbol, "ETHUSDT");
        assert_eq!(depth.update, DepthUpdate::Delta);
        assert_eq!(depth.first_update_id, Some(100));
        assert_eq!(depth.final_update_id, Some(105));
        assert_eq!(depth.bids.len(), 2);
        assert_eq!(depth.best_bid().unwrap().price, dec("2200.10"));
        assert_eq!(depth.timestamp.timestamp_millis(), 1_700_000_000_200);
    }

    #[test]
    fn decode_bare_event() {
        let raw = r#"{"e":"trade","E":1,"s":"SOLUSDT","t":1,"p":"100","q":"2","T":2,"m":false}"#;
        let Envelope::Market(StreamMessage::Trade(trade)) = BinanceCodec::new().decode(raw).unwrap()
        else {
            panic!("expected trade");
        };
        assert_eq!(trade.side, TradeSide::Buy);
        assert_eq!(trade.notional(), dec("200"));
    }

    #[test]
    fn decode_ack_and_error_replies() {
        let codec = BinanceCodec::new();
        assert_eq!(
            codec.decode(r#"{"result":null,"id":3}"#).unwrap(),
            Envelope::Reply(ControlReply::Ack { id: Some(3), message: None })
        );
        assert_eq!(
            codec
                .decode(r#"{"error":{"code":2,"msg":"Invalid request"},"id":4}"#)
                .unwrap(),
            Envelope::Reply(ControlReply::Rejected {
                id: Some(4),
                code: Some(2),
                message: "Invalid request".to_string(),
            })
        );
    }

    #[test_case("[]", "invalid_format" ; "not an object")]
    #[test_case(r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade"}}"#, "unknown_stream" ; "unrouted stream")]
    #[test_case(r#"{"stream":"btcusdt@trade"}"#, "missing_field" ; "missing data")]
    #[test_case(r#"{"e":"kline","s":"BTCUSDT"}"#, "unknown_kind" ; "unknown event")]
    #[test_case(r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","p":"x","q":"1","T":1,"m":false}}"#, "json" ; "bad price")]
    #[test_case(r#"{"stream":"ethusdt@trade","data":{"e":"trade","s":"BTCUSDT","p":"1","q":"1","T":1,"m":false}}"#, "invalid_format" ; "stream symbol mismatch")]
    fn decode_failures(raw: &str, reason: &str) {
        let err = BinanceCodec::new().decode(raw).unwrap_err();
        assert_eq!(err.reason(), reason, "{err}");
    }
}
