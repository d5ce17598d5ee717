//! Order book depth watcher.
//!
//! Polls the order book for one symbol, measures quote value resting within
//! a percentage band around mid price on each side, persists every
//! measurement and alerts when a side stays below its minimum for longer
//! than the configured duration.

use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{BreachEpisode, WatcherContext, WatcherError};
use crate::events::{AlertKind, DepthSample, MarketKey, OrderBookSnapshot};
use crate::utils::{RetryController, RetryDecision, RetryPolicy};

/// Wait after a one-sided book before fetching again.
const EMPTY_BOOK_DELAY: Duration = Duration::from_secs(1);

/// Per-symbol thresholds for the depth watcher.
#[derive(Debug, Clone, Copy)]
pub struct DepthWatchParams {
    /// Band half-width around mid price, in percent.
    pub percentage: f64,
    /// Minimum quote value per side.
    pub min_value: f64,
    /// Minutes between alerts of the same side; `<= 0` disables throttling.
    pub notification_interval: f64,
    /// How long a side must stay below `min_value` before the first alert.
    pub duration: Duration,
}

/// Depth measured on one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthMetrics {
    pub mid_price: f64,
    pub bid_depth_value: f64,
    pub ask_depth_value: f64,
    pub bid_quantity: f64,
    pub ask_quantity: f64,
}

/// Measures depth within `percentage` percent of mid price.
///
/// Returns `None` when either side is empty. Levels are walked best first
/// and the walk stops at the first level outside the band.
pub fn compute_depth(book: &OrderBookSnapshot, percentage: f64) -> Option<DepthMetrics> {
    if book.is_one_sided() {
        return None;
    }
    let mid_price = book.mid_price()?;
    let lower_bound = mid_price * (1.0 - percentage / 100.0);
    let upper_bound = mid_price * (1.0 + percentage / 100.0);

    let (bid_depth_value, bid_quantity) = book
        .bids
        .iter()
        .take_while(|level| level.price >= lower_bound)
        .fold((0.0, 0.0), |(value, qty), level| {
            (value + level.notional(), qty + level.size)
        });

    let (ask_depth_value, ask_quantity) = book
        .asks
        .iter()
        .take_while(|level| level.price <= upper_bound)
        .fold((0.0, 0.0), |(value, qty), level| {
            (value + level.notional(), qty + level.size)
        });

    Some(DepthMetrics {
        mid_price,
        bid_depth_value,
        ask_depth_value,
        bid_quantity,
        ask_quantity,
    })
}

/// Book side being evaluated.
#[derive(Debug, Clone, Copy)]
enum Side {
    Bid,
    Ask,
}

impl Side {
    fn kind(self) -> AlertKind {
        match self {
            Side::Bid => AlertKind::DepthBid,
            Side::Ask => AlertKind::DepthAsk,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Side::Bid => "Bid",
            Side::Ask => "Ask",
        }
    }

    fn band_sign(self) -> char {
        match self {
            Side::Bid => '-',
            Side::Ask => '+',
        }
    }
}

/// Watches order book depth for one symbol.
pub struct DepthWatcher {
    ctx: WatcherContext,
    key: MarketKey,
    params: DepthWatchParams,
    poll_interval: Duration,
    retry: RetryController,
    bid_episode: BreachEpisode,
    ask_episode: BreachEpisode,
}

impl DepthWatcher {
    pub fn new(
        ctx: WatcherContext,
        symbol: &str,
        params: DepthWatchParams,
        poll_interval: Duration,
    ) -> Self {
        let key = ctx.key(symbol);
        Self {
            ctx,
            key,
            params,
            poll_interval,
            retry: RetryController::new(RetryPolicy::DEPTH),
            bid_episode: BreachEpisode::default(),
            ask_episode: BreachEpisode::default(),
        }
    }

    pub fn key(&self) -> &MarketKey {
        &self.key
    }

    /// Runs until the context stops running or the retry budget is spent.
    pub async fn run(mut self) -> Result<(), WatcherError> {
        info!(
            "[{}] DepthWatcher starting (band ±{}%, min value {}, duration {}s)",
            self.key,
            self.params.percentage,
            self.params.min_value,
            self.params.duration.as_secs_f64()
        );

        while self.ctx.is_running() {
            match self.ctx.source.fetch_order_book(&self.key.symbol).await {
                Ok(book) => {
                    self.retry.record_success();

                    let Some(metrics) = compute_depth(&book, self.params.percentage) else {
                        debug!("[{}] One-sided order book, retrying shortly", self.key);
                        tokio::time::sleep(EMPTY_BOOK_DELAY).await;
                        continue;
                    };

                    self.process(metrics).await;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => match self.retry.record_failure() {
                    RetryDecision::Wait(backoff) => {
                        let delay = e.retry_after().map_or(backoff, |hint| hint.max(backoff));
                        warn!(
                            "[{}] Order book fetch failed (attempt {}), retrying in {}ms: {}",
                            self.key,
                            self.retry.consecutive_failures(),
                            delay.as_millis(),
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        let failures = self.retry.consecutive_failures();
                        error!(
                            "[{}] DepthWatcher giving up after {} consecutive failures: {}",
                            self.key, failures, e
                        );
                        return Err(WatcherError::RetriesExhausted {
                            failures,
                            last_error: e.to_string(),
                        });
                    }
                },
            }
        }

        info!("[{}] DepthWatcher stopped", self.key);
        Ok(())
    }

    /// Persists one measurement and evaluates both sides.
    async fn process(&mut self, metrics: DepthMetrics) {
        let sample = DepthSample {
            exchange: self.key.exchange.clone(),
            symbol: self.key.symbol.clone(),
            timestamp: Utc::now(),
            bid_depth_value: metrics.bid_depth_value,
            ask_depth_value: metrics.ask_depth_value,
            mid_price: metrics.mid_price,
            bid_quantity: metrics.bid_quantity,
            ask_quantity: metrics.ask_quantity,
        };
        self.ctx.persistence.record_depth(&sample).await;

        debug!(
            "[{}] mid={:.4} bid_depth={:.2} ask_depth={:.2}",
            self.key, metrics.mid_price, metrics.bid_depth_value, metrics.ask_depth_value
        );

        let now = Instant::now();
        self.evaluate_side(Side::Bid, &metrics, now).await;
        self.evaluate_side(Side::Ask, &metrics, now).await;
    }

    async fn evaluate_side(&mut self, side: Side, metrics: &DepthMetrics, now: Instant) {
        let (value, quantity) = match side {
            Side::Bid => (metrics.bid_depth_value, metrics.bid_quantity),
            Side::Ask => (metrics.ask_depth_value, metrics.ask_quantity),
        };
        let episode = match side {
            Side::Bid => &mut self.bid_episode,
            Side::Ask => &mut self.ask_episode,
        };

        if value >= self.params.min_value {
            if episode.clear() {
                info!(
                    "[{}] {} depth recovered: {:.2} >= {}",
                    self.key,
                    side.label(),
                    value,
                    self.params.min_value
                );
            }
            self.ctx.gate.clear(&self.key.symbol, side.kind());
            return;
        }

        let elapsed = episode.breach(now);
        if elapsed < self.params.duration {
            debug!(
                "[{}] {} depth low for {:.1}s of {:.1}s",
                self.key,
                side.label(),
                elapsed.as_secs_f64(),
                self.params.duration.as_secs_f64()
            );
            return;
        }

        let message = format!(
            "[{}] Low {} Depth ({}{}%) for {}s: {:.2} < {} (qty {:.4}, mid {:.4})",
            self.key,
            side.label(),
            side.band_sign(),
            self.params.percentage,
            elapsed.as_secs(),
            value,
            self.params.min_value,
            quantity,
            metrics.mid_price
        );
        self.ctx
            .raise_alert(&self.key, side.kind(), self.params.notification_interval, message)
            .await;
    }
}

impl std::fmt::Debug for DepthWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthWatcher")
            .field("key", &self.key)
            .field("params", &self.params)
            .field("consecutive_failures", &self.retry.consecutive_failures())
            .field("bid_breached", &self.bid_episode.is_active())
            .field("ask_breached", &self.ask_episode.is_active())
            .finish()
    }
}
