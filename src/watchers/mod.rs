//! Watcher subsystems for liquidity monitoring.
//!
//! Each watcher owns one (exchange, symbol) loop and runs as its own task.
//! Watchers pull from a [`MarketDataSource`], persist what they measure and
//! raise alerts through the shared [`NotificationGate`].

mod depth_watcher;
mod notification_gate;
mod trade_watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use depth_watcher::{compute_depth, DepthMetrics, DepthWatchParams, DepthWatcher};
pub use notification_gate::NotificationGate;
pub use trade_watcher::{SilenceCheck, TradeActivity, TradeSilenceParams, TradeSilenceWatcher};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connectors::{MarketDataSource, NotificationSink};
use crate::events::{AlertKind, AlertRecord, MarketKey};
use crate::storage::PersistenceSink;

/// Reason a watcher loop ended other than a requested stop.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("gave up after {failures} consecutive fetch failures, last error: {last_error}")]
    RetriesExhausted { failures: u32, last_error: String },
}

/// Everything a watcher shares with its siblings on one exchange.
#[derive(Clone)]
pub struct WatcherContext {
    pub exchange: String,
    pub source: Arc<dyn MarketDataSource>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub notifier: Arc<dyn NotificationSink>,
    pub gate: NotificationGate,
    running: Arc<AtomicBool>,
}

impl WatcherContext {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        persistence: Arc<dyn PersistenceSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            exchange: source.exchange_id().to_string(),
            source,
            persistence,
            notifier,
            gate: NotificationGate::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative stop flag, checked by loops at each iteration boundary.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn key(&self, symbol: &str) -> MarketKey {
        MarketKey::new(self.exchange.clone(), symbol)
    }

    /// Sends and records an alert if the gate lets it through.
    ///
    /// Returns whether the alert fired. A failed delivery still counts as
    /// fired: the record is persisted and the throttle entry stays.
    pub async fn raise_alert(
        &self,
        key: &MarketKey,
        kind: AlertKind,
        interval_minutes: f64,
        message: String,
    ) -> bool {
        if !self.gate.should_notify(&key.symbol, kind, interval_minutes) {
            debug!("[{}] {} alert throttled", key, kind);
            return false;
        }

        warn!("[{}] ALERT {}", key, message);
        if !self.notifier.send(&message).await {
            warn!("[{}] {} notification was not delivered", key, kind);
        }
        self.persistence
            .record_alert(&AlertRecord::new(key, message))
            .await;
        true
    }
}

impl std::fmt::Debug for WatcherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherContext")
            .field("exchange", &self.exchange)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Start of the current breach of one metric, if any.
///
/// Owned by exactly one task; never shared.
#[derive(Debug, Default)]
pub(crate) struct BreachEpisode {
    started: Option<Instant>,
}

impl BreachEpisode {
    /// Marks the metric as breached and returns how long the breach has lasted.
    pub(crate) fn breach(&mut self, now: Instant) -> Duration {
        let started = *self.started.get_or_insert(now);
        now.saturating_duration_since(started)
    }

    /// Ends the episode. Returns true if one was in progress.
    pub(crate) fn clear(&mut self) -> bool {
        self.started.take().is_some()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.started.is_some()
    }
}
