//! Relay channel codec.
//!
//! Speaks the channel protocol of the market-data relay sitting in front of
//! the exchange normalizers.
//!
//! Control frames name a channel, `{kind}:{SYMBOL}`:
//!
//! ```json
//! {"action":"subscribe","channel":"trade:BTCUSDT"}
//! ```
//!
//! Inbound messages are flat and may arrive batched:
//!
//! ```json
//! {"type":"trade","exchange":"bybit","symbol":"btcusdt","price":43000.5,
//!  "quantity":0.01,"side":"buy","timestamp":1700000000000}
//! {"type":"depth","exchange":"binance","symbol":"ethusdt","timestamp":1700000000000,
//!  "bids":[[2200.1,3.0]],"asks":[[2200.2,1.0]]}
//! {"type":"batch","count":2,"timestamp":1700000000001,"batch":[{...},{...}]}
//! ```
//!
//! Replies: `{"status":"success","message":"..."}` or `{"error":"..."}`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::{CodecError, ControlReply, Envelope, EnvelopeCodec};
use crate::domain::streaming::{
    DepthMessage, DepthUpdate, PriceLevel, StreamMessage, TradeMessage, TradeSide,
};
use crate::domain::subscription::ControlFrame;
use crate::domain::topic::StreamKind;

const BATCH_TYPE: &str = "batch";

#[derive(Debug, Serialize)]
struct ChannelRequest {
    action: &'static str,
    channel: String,
}

/// Fields shared by every relay message, before the type is known.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    message: Option<String>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RelayTrade {
    symbol: String,
    price: Decimal,
    quantity: Decimal,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    is_buyer_maker: Option<bool>,
    #[serde(default)]
    trade_id: Option<Value>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RelayDepth {
    symbol: String,
    #[serde(default)]
    bids: Vec<PriceLevel>,
    #[serde(default)]
    asks: Vec<PriceLevel>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RelayBatch {
    batch: Vec<Value>,
    #[serde(default)]
    count: Option<usize>,
}

/// Codec for the relay's `{action, channel}` protocol.
#[derive(Debug, Default, Clone)]
pub struct RelayCodec;

impl RelayCodec {
    /// Create a new relay codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn decode_value(value: Value) -> Result<Envelope, CodecError> {
        let raw: RawMessage = serde_json::from_value(value.clone())?;

        if let Some(error) = raw.error {
            let message = error
                .as_str()
                .map_or_else(|| error.to_string(), str::to_string);
            return Ok(Envelope::Reply(ControlReply::Rejected {
                id: None,
                code: None,
                message,
            }));
        }

        let Some(kind) = raw.kind else {
            if raw.status.is_some() {
                return Ok(Envelope::Reply(ControlReply::Ack {
                    id: None,
                    message: raw.message,
                }));
            }
            return Err(CodecError::MissingField("type"));
        };

        if kind == BATCH_TYPE {
            return Err(CodecError::InvalidFormat("nested batch".to_string()));
        }

        let message = match StreamKind::from_wire(&kind).ok_or(CodecError::UnknownKind(kind))? {
            StreamKind::Trade => {
                let trade: RelayTrade = serde_json::from_value(value)?;
                StreamMessage::Trade(TradeMessage {
                    side: trade_side(trade.side.as_deref(), trade.is_buyer_maker),
                    trade_id: trade.trade_id.as_ref().and_then(parse_trade_id),
                    timestamp: millis(trade.timestamp)?,
                    symbol: trade.symbol,
                    price: trade.price,
                    quantity: trade.quantity,
                })
            }
            StreamKind::Depth => {
                let depth: RelayDepth = serde_json::from_value(value)?;
                StreamMessage::Depth(DepthMessage {
                    timestamp: millis(depth.timestamp)?,
                    symbol: depth.symbol,
                    update: DepthUpdate::Delta,
                    bids: depth.bids,
                    asks: depth.asks,
                    first_update_id: None,
                    final_update_id: None,
                })
            }
        };

        Ok(Envelope::Market(message))
    }
}

impl EnvelopeCodec for RelayCodec {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn encode_control(&self, frame: &ControlFrame) -> Result<String, CodecError> {
        let request = ChannelRequest {
            action: frame.action.as_str(),
            channel: frame.topic.to_string(),
        };
        Ok(serde_json::to_string(&request)?)
    }

    fn decode(&self, raw: &str) -> Result<Envelope, CodecError> {
        let value: Value = serde_json::from_str(raw)?;
        if is_batch(&value) {
            return Err(CodecError::InvalidFormat(
                "batch frame carries several messages".to_string(),
            ));
        }
        Self::decode_value(value)
    }

    fn decode_all(&self, raw: &str) -> Vec<Result<Envelope, CodecError>> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => return vec![Err(e.into())],
        };

        if !is_batch(&value) {
            return vec![Self::decode_value(value)];
        }

        let batch: RelayBatch = match serde_json::from_value(value) {
            Ok(batch) => batch,
            Err(e) => return vec![Err(e.into())],
        };
        if batch.count.is_some_and(|count| count != batch.batch.len()) {
            tracing::debug!(
                count = ?batch.count,
                items = batch.batch.len(),
                "Batch count does not match its items"
            );
        }

        batch.batch.into_iter().map(Self::decode_value).collect()
    }
}

fn is_batch(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some(BATCH_TYPE)
}

fn trade_side(side: Option<&str>, is_buyer_maker: Option<bool>) -> TradeSide {
    match side.map(str::to_ascii_lowercase).as_deref() {
        Some("buy") => TradeSide::Buy,
        Some("sell") => TradeSide::Sell,
        _ => match is_buyer_maker {
            Some(true) => TradeSide::Sell,
            Some(false) => TradeSide::Buy,
            None => TradeSide::Unknown,
        },
    }
}

fn parse_trade_id(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn millis(timestamp: i64) -> Result<DateTime<Utc>, CodecError> {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .ok_or_else(|| CodecError::InvalidFormat(format!("timestamp out of range: {timestamp}")))
}
