//! Normalized market data and monitor output records.
//!
//! Raw exchange payloads are converted into these types at the connector
//! boundary. Watchers only ever see `OrderBookSnapshot` and `Trade`, and
//! only ever emit `DepthSample` and `AlertRecord`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one monitored (exchange, symbol) pair.
///
/// Displays as `BINANCE BTC/USDT`, which is the prefix used by log lines and
/// alert messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketKey {
    pub exchange: String,
    pub symbol: String,
}

impl MarketKey {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.exchange.to_uppercase(), self.symbol)
    }
}

/// A single price level in the order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }

    /// Quote value of the level (`price * size`).
    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// Order book snapshot as returned by a market data source.
///
/// Bids are ordered best (highest) first, asks best (lowest) first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBookSnapshot {
    pub fn new(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self { bids, asks }
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Returns true if either side of the book has no levels.
    pub fn is_one_sided(&self) -> bool {
        self.bids.is_empty() || self.asks.is_empty()
    }

    /// Mid price, if both sides are populated.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }
}

/// A public trade print.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange timestamp in epoch milliseconds, when the venue provides one.
    pub timestamp: Option<i64>,
    pub price: Option<f64>,
    pub size: Option<f64>,
}

impl Trade {
    pub fn at(timestamp_ms: i64) -> Self {
        Self {
            timestamp: Some(timestamp_ms),
            ..Self::default()
        }
    }
}

/// Depth measurement derived from one order book snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSample {
    pub exchange: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bid_depth_value: f64,
    pub ask_depth_value: f64,
    pub mid_price: f64,
    pub bid_quantity: f64,
    pub ask_quantity: f64,
}

/// A fired alert, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub exchange: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl AlertRecord {
    pub fn new(key: &MarketKey, message: impl Into<String>) -> Self {
        Self {
            exchange: key.exchange.clone(),
            symbol: key.symbol.clone(),
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Alert categories, each with its own breach episode and throttle entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DepthBid,
    DepthAsk,
    Silence,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::DepthBid => "depth_bid",
            AlertKind::DepthAsk => "depth_ask",
            AlertKind::Silence => "silence",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_key_display() {
        let key = MarketKey::new("binance", "BTC/USDT");
        assert_eq!(format!("{}", key), "BINANCE BTC/USDT");
    }

    #[test]
    fn test_mid_price() {
        let book = OrderBookSnapshot::new(
            vec![PriceLevel::new(100.0, 1.0), PriceLevel::new(99.0, 2.0)],
            vec![PriceLevel::new(102.0, 1.0)],
        );
        assert_eq!(book.mid_price(), Some(101.0));
        assert!(!book.is_one_sided());
    }

    #[test]
    fn test_one_sided_book_has_no_mid() {
        let book = OrderBookSnapshot::new(vec![PriceLevel::new(100.0, 1.0)], vec![]);
        assert!(book.is_one_sided());
        assert_eq!(book.mid_price(), None);
    }

    #[test]
    fn test_alert_kind_names() {
        assert_eq!(AlertKind::DepthBid.as_str(), "depth_bid");
        assert_eq!(AlertKind::DepthAsk.to_string(), "depth_ask");
        assert_eq!(AlertKind::Silence.as_str(), "silence");
    }
}
