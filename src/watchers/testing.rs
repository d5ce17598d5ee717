//! In-memory collaborators for watcher and supervisor tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::WatcherContext;
use crate::connectors::{FetchError, MarketDataSource, NotificationSink};
use crate::events::{AlertRecord, DepthSample, OrderBookSnapshot, PriceLevel, Trade};
use crate::storage::PersistenceSink;

pub(crate) const EXCHANGE: &str = "binance";
pub(crate) const SYMBOL: &str = "BTC/USDT";

/// Book with one level per side.
pub(crate) fn book(bid: (f64, f64), ask: (f64, f64)) -> OrderBookSnapshot {
    OrderBookSnapshot::new(
        vec![PriceLevel::new(bid.0, bid.1)],
        vec![PriceLevel::new(ask.0, ask.1)],
    )
}

/// Market data source answering from scripted responses.
///
/// Scripted books are served first; afterwards the current book is served
/// on every call. A `None` book or trade list makes the fetch fail, with a
/// rate limit error when one is set.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    book_script: Mutex<VecDeque<OrderBookSnapshot>>,
    book: Mutex<Option<OrderBookSnapshot>>,
    trades: Mutex<Option<Vec<Trade>>>,
    hang: AtomicBool,
    rate_limit_ms: Mutex<Option<u64>>,
    pub book_fetches: AtomicUsize,
    pub trade_fetches: AtomicUsize,
    pub closed: AtomicBool,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_book(self, book: OrderBookSnapshot) -> Self {
        self.set_book(Some(book));
        self
    }

    pub(crate) fn with_trades(self, trades: Vec<Trade>) -> Self {
        self.set_trades(Some(trades));
        self
    }

    pub(crate) fn with_book_script(self, books: Vec<OrderBookSnapshot>) -> Self {
        self.book_script.lock().unwrap().extend(books);
        self
    }

    /// Failed fetches report a rate limit with the given retry-after.
    pub(crate) fn rate_limited(self, retry_after_ms: u64) -> Self {
        *self.rate_limit_ms.lock().unwrap() = Some(retry_after_ms);
        self
    }

    /// Every fetch blocks forever.
    pub(crate) fn hanging(self) -> Self {
        self.hang.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn set_book(&self, book: Option<OrderBookSnapshot>) {
        *self.book.lock().unwrap() = book;
    }

    pub(crate) fn set_trades(&self, trades: Option<Vec<Trade>>) {
        *self.trades.lock().unwrap() = trades;
    }

    fn failure(&self) -> FetchError {
        match *self.rate_limit_ms.lock().unwrap() {
            Some(ms) => FetchError::RateLimited(ms),
            None => FetchError::ParseError("scripted failure".to_string()),
        }
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl MarketDataSource for ScriptedSource {
    fn exchange_id(&self) -> &str {
        EXCHANGE
    }

    async fn fetch_order_book(&self, _symbol: &str) -> Result<OrderBookSnapshot, FetchError> {
        self.book_fetches.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang().await;
        if let Some(book) = self.book_script.lock().unwrap().pop_front() {
            return Ok(book);
        }
        self.book
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| self.failure())
    }

    async fn fetch_trades(&self, _symbol: &str) -> Result<Vec<Trade>, FetchError> {
        self.trade_fetches.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang().await;
        self.trades
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| self.failure())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Persistence sink keeping everything in memory.
#[derive(Default)]
pub(crate) struct RecordingStore {
    pub depth: Mutex<Vec<DepthSample>>,
    pub alerts: Mutex<Vec<AlertRecord>>,
}

impl RecordingStore {
    pub(crate) fn depth_count(&self) -> usize {
        self.depth.lock().unwrap().len()
    }

    pub(crate) fn alert_messages(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.message.clone())
            .collect()
    }
}

#[async_trait]
impl PersistenceSink for RecordingStore {
    async fn record_depth(&self, sample: &DepthSample) {
        self.depth.lock().unwrap().push(sample.clone());
    }

    async fn record_alert(&self, alert: &AlertRecord) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

/// Notification sink remembering every message it was asked to send.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub(crate) fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub(crate) fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send(&self, text: &str) -> bool {
        self.messages.lock().unwrap().push(text.to_string());
        true
    }
}

/// A running context wired to the given test doubles.
pub(crate) fn context(
    source: Arc<ScriptedSource>,
    store: Arc<RecordingStore>,
    notifier: Arc<RecordingNotifier>,
) -> WatcherContext {
    let ctx = WatcherContext::new(source, store, notifier);
    ctx.set_running(true);
    ctx
}
