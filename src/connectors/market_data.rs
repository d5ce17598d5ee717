//! Market data sources.
//!
//! [`MarketDataSource`] is the seam between the watchers and whatever speaks
//! to an exchange. [`HttpMarketDataSource`] is a generic REST poller driven by
//! URL templates; it understands the common `[[price, qty], ...]` book shape
//! and trade arrays carrying a millisecond timestamp.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::events::{OrderBookSnapshot, PriceLevel, Trade};

/// Placeholder substituted with the exchange-native market id in URL templates.
const SYMBOL_PLACEHOLDER: &str = "{symbol}";

/// Transient failure while fetching market data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited, retry after: {0}ms")]
    RateLimited(u64),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Data source is closed")]
    Closed,
}

impl FetchError {
    /// Wait requested by the server before the next request, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited(ms) => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Source of order books and trades for one exchange.
#[async_trait]
pub trait MarketDataSource: Send + Sync + 'static {
    /// Exchange identifier, used for logging and persisted records.
    fn exchange_id(&self) -> &str;

    /// Fetches a fresh order book snapshot, bids best first, asks best first.
    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, FetchError>;

    /// Fetches recent trades, oldest first.
    async fn fetch_trades(&self, symbol: &str) -> Result<Vec<Trade>, FetchError>;

    /// Releases the underlying connection. Later fetches may fail with
    /// [`FetchError::Closed`].
    async fn close(&self) {}
}

/// REST polling source configured with URL templates.
pub struct HttpMarketDataSource {
    exchange: String,
    client: Client,
    order_book_url: String,
    trades_url: Option<String>,
    markets: RwLock<HashMap<String, String>>,
    closed: AtomicBool,
}

impl HttpMarketDataSource {
    /// Builds a source from exchange configuration, registering any
    /// configured market ids.
    pub fn from_config(config: &ExchangeConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        let source = Self {
            exchange: config.id.clone(),
            client,
            order_book_url: config.order_book_url.clone(),
            trades_url: config.trades_url.clone(),
            markets: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };

        for market in &config.markets {
            source.register_market(&market.symbol, &market.id);
        }

        Ok(source)
    }

    /// Registers synthetic market metadata: requests for `symbol` will use
    /// `market_id` in place of the symbol. Must happen before the first fetch
    /// for that symbol.
    pub fn register_market(&self, symbol: &str, market_id: &str) {
        let mut markets = match self.markets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(
            "[{} {}] Registered market id {}",
            self.exchange.to_uppercase(),
            symbol,
            market_id
        );
        markets.insert(symbol.to_string(), market_id.to_string());
    }

    /// Exchange-native id for a configured symbol.
    pub fn market_id(&self, symbol: &str) -> String {
        let markets = match self.markets.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        markets
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_string())
    }

    fn url_for(&self, template: &str, symbol: &str) -> String {
        template.replace(SYMBOL_PLACEHOLDER, &self.market_id(symbol))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(FetchError::Closed);
        }

        let response = self.client.get(url).send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            warn!("[{}] Rate limited. Retry after {}ms", self.exchange.to_uppercase(), retry_after);
            return Err(FetchError::RateLimited(retry_after));
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::ApiError { status, message });
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketDataSource {
    fn exchange_id(&self) -> &str {
        &self.exchange
    }

    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, FetchError> {
        let url = self.url_for(&self.order_book_url, symbol);
        let book: BookResponse = self.get_json(&url).await?;
        book.into_snapshot()
    }

    async fn fetch_trades(&self, symbol: &str) -> Result<Vec<Trade>, FetchError> {
        let template = self.trades_url.as_deref().ok_or_else(|| {
            FetchError::ParseError(format!("no trades_url configured for {}", self.exchange))
        })?;
        let url = self.url_for(template, symbol);
        let trades: Vec<TradeResponse> = self.get_json(&url).await?;
        trades.into_iter().map(TradeResponse::into_trade).collect()
    }

    async fn close(&self) {
        if !self.closed.swap(true, AtomicOrdering::AcqRel) {
            info!("[{}] Market data source closed", self.exchange.to_uppercase());
        }
    }
}

impl std::fmt::Debug for HttpMarketDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMarketDataSource")
            .field("exchange", &self.exchange)
            .field("order_book_url", &self.order_book_url)
            .field("trades_url", &self.trades_url)
            .field("closed", &self.closed.load(AtomicOrdering::Relaxed))
            .finish()
    }
}

// ============ Response Types ============

/// Order book response: `{"bids": [...], "asks": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BookResponse {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl BookResponse {
    /// Parses levels and enforces best-first ordering on both sides.
    pub fn into_snapshot(self) -> Result<OrderBookSnapshot, FetchError> {
        let mut bids = self
            .bids
            .iter()
            .map(BookLevel::to_price_level)
            .collect::<Result<Vec<_>, _>>()?;
        let mut asks = self
            .asks
            .iter()
            .map(BookLevel::to_price_level)
            .collect::<Result<Vec<_>, _>>()?;

        bids.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal));
        asks.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));

        Ok(OrderBookSnapshot::new(bids, asks))
    }
}

/// A single book level, either `[price, qty, ...]` or `{"price", "size"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BookLevel {
    Pair(Vec<Value>),
    Object {
        price: Value,
        #[serde(alias = "qty", alias = "quantity", alias = "amount")]
        size: Value,
    },
}

impl BookLevel {
    fn to_price_level(&self) -> Result<PriceLevel, FetchError> {
        let (price, size) = match self {
            BookLevel::Pair(values) if values.len() >= 2 => (&values[0], &values[1]),
            BookLevel::Pair(values) => {
                return Err(FetchError::ParseError(format!(
                    "book level has {} fields, expected at least 2",
                    values.len()
                )))
            }
            BookLevel::Object { price, size } => (price, size),
        };
        Ok(PriceLevel::new(number(price)?, number(size)?))
    }
}

/// A single trade print; only the timestamp matters to the monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeResponse {
    #[serde(default, alias = "time", alias = "ts", alias = "T")]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default, alias = "qty", alias = "quantity", alias = "amount")]
    pub size: Option<Value>,
}

impl TradeResponse {
    fn into_trade(self) -> Result<Trade, FetchError> {
        let timestamp = match self.timestamp {
            Some(Value::Null) | None => None,
            Some(ref value) => Some(number(value)? as i64),
        };
        Ok(Trade {
            timestamp,
            price: self.price.as_ref().map(number).transpose()?,
            size: self.size.as_ref().map(number).transpose()?,
        })
    }
}

/// Reads a JSON number or numeric string.
fn number(value: &Value) -> Result<f64, FetchError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FetchError::ParseError(format!("number out of range: {}", n))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| FetchError::ParseError(format!("invalid number {:?}: {}", s, e))),
        other => Err(FetchError::ParseError(format!("expected number, got {}", other))),
    }
}
