//! Market Data Streaming Types
//!
//! Canonical, codec-agnostic representation of the messages fanned out to
//! listeners: executed trades and order book depth updates. Wire formats are
//! mapped onto these types by the codecs in `infrastructure::codec`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::topic::StreamKind;

// =============================================================================
// Trades
// =============================================================================

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Buyer lifted the offer.
    Buy,
    /// Seller hit the bid.
    Sell,
    /// Provider did not report the aggressor.
    Unknown,
}

/// A single executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeMessage {
    /// Normalized symbol.
    pub symbol: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Aggressor side.
    pub side: TradeSide,
    /// Provider trade id, when the provider sends one.
    pub trade_id: Option<u64>,
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
}

impl TradeMessage {
    /// Price times quantity.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

// =============================================================================
// Depth
// =============================================================================

/// Whether a depth message replaces the book or amends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthUpdate {
    /// Full top-of-book snapshot.
    Snapshot,
    /// Incremental change; a zero quantity removes the level.
    #[default]
    Delta,
}

/// One price level of an order book side.
///
/// Encoded on the wire as a `[price, quantity]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Decimal, Decimal)", into = "(Decimal, Decimal)")]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Resting quantity at this price.
    pub quantity: Decimal,
}

impl PriceLevel {
    /// Create a price level.
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, quantity): (Decimal, Decimal)) -> Self {
        Self { price, quantity }
    }
}

impl From<PriceLevel> for (Decimal, Decimal) {
    fn from(level: PriceLevel) -> Self {
        (level.price, level.quantity)
    }
}

/// Order book snapshot or delta. No aggregation is performed on the way
/// through the multiplexer; consumers own book reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthMessage {
    /// Normalized symbol.
    pub symbol: String,
    /// Snapshot or delta.
    #[serde(default)]
    pub update: DepthUpdate,
    /// Bid levels as sent by the provider.
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    /// Ask levels as sent by the provider.
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    /// First update id covered by a delta.
    #[serde(default)]
    pub first_update_id: Option<u64>,
    /// Last update id covered by a delta.
    #[serde(default)]
    pub final_update_id: Option<u64>,
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
}

impl DepthMessage {
    /// Highest bid with non-zero quantity.
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .filter(|l| !l.quantity.is_zero())
            .max_by_key(|l| l.price)
            .copied()
    }

    /// Lowest ask with non-zero quantity.
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .filter(|l| !l.quantity.is_zero())
            .min_by_key(|l| l.price)
            .copied()
    }

    /// Best ask minus best bid, if both sides are present.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Midpoint of the best bid and ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price;
        let ask = self.best_ask()?.price;
        Some((bid + ask) / Decimal::TWO)
    }
}

// =============================================================================
// Stream Message
// =============================================================================

/// A decoded market data message, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Trade stream message.
    Trade(TradeMessage),
    /// Depth stream message.
    Depth(DepthMessage),
}

impl StreamMessage {
    /// Stream kind of this message.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        match self {
            Self::Trade(_) => StreamKind::Trade,
            Self::Depth(_) => StreamKind::Depth,
        }
    }

    /// Symbol carried by this message.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Trade(t) => &t.symbol,
            Self::Depth(d) => &d.symbol,
        }
    }

    /// Exchange timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(t) => t.timestamp,
            Self::Depth(d) => d.timestamp,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn depth(bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthMessage {
        DepthMessage {
            symbol: "ETHUSDT".to_string(),
            update: DepthUpdate::Snapshot,
            bids: bids
                .iter()
                .map(|(p, q)| PriceLevel::new(dec(p), dec(q)))
                .collect(),
            asks: asks
                .iter()
                .map(|(p, q)| PriceLevel::new(dec(p), dec(q)))
                .collect(),
            first_update_id: None,
            final_update_id: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn best_levels_ignore_removed_and_order() {
        let book = depth(
            &[("100.0", "1"), ("101.5", "0"), ("100.5", "2")],
            &[("102.0", "1"), ("101.0", "0"), ("103.0", "4")],
        );

        assert_eq!(book.best_bid().unwrap().price, dec("100.5"));
        assert_eq!(book.best_ask().unwrap().price, dec("102.0"));
        assert_eq!(book.spread(), Some(dec("1.5")));
        assert_eq!(book.mid_price(), Some(dec("101.25")));
    }

    #[test]
    fn one_sided_book_has_no_spread() {
        let book = depth(&[("100.0", "1")], &[]);
        assert!(book.best_ask().is_none());
        assert!(book.spread().is_none());
        assert!(book.mid_price().is_none());
    }

    #[test]
    fn price_level_wire_format() {
        let level: PriceLevel = serde_json::from_str(r#"["2500.10","3.5"]"#).unwrap();
        assert_eq!(level.price, dec("2500.10"));
        assert_eq!(level.quantity, dec("3.5"));

        let numeric: PriceLevel = serde_json::from_str("[2500.1, 2]").unwrap();
        assert_eq!(numeric.price, dec("2500.1"));
    }

    #[test]
    fn trade_notional() {
        let trade = TradeMessage {
            symbol: "BTCUSDT".to_string(),
            price: dec("65000.5"),
            quantity: dec("0.2"),
            side: TradeSide::Buy,
            trade_id: Some(7),
            timestamp: Utc::now(),
        };
        assert_eq!(trade.notional(), dec("13000.1"));
    }

    #[test]
    fn stream_message_accessors() {
        let book = depth(&[], &[]);
        let msg = StreamMessage::Depth(book);
        assert_eq!(msg.kind(), StreamKind::Depth);
        assert_eq!(msg.symbol(), "ETHUSDT");
    }
}
