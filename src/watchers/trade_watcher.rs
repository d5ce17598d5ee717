//! Trade silence watcher.
//!
//! Two tasks per symbol: a fetch loop that advances the last trade time and
//! a once-a-second check that alerts when no trade has been seen for longer
//! than the configured threshold. The check lives only as long as the fetch
//! loop that feeds it.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{BreachEpisode, WatcherContext, WatcherError};
use crate::events::{AlertKind, MarketKey};
use crate::utils::{system_clock, RetryController, RetryDecision, RetryPolicy, WallClock};

/// Period of the silence check.
const CHECK_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy)]
pub struct TradeSilenceParams {
    /// Seconds without a trade before alerting.
    pub max_silence_time: f64,
    /// Minutes between silence alerts; `<= 0` disables throttling.
    pub notification_interval: f64,
}

/// Time of the most recent trade seen, in epoch milliseconds.
///
/// Written only by the fetch loop, read by the silence check.
#[derive(Debug)]
pub struct TradeActivity {
    last_trade_ms: AtomicI64,
}

impl TradeActivity {
    pub fn new(start_ms: i64) -> Self {
        Self {
            last_trade_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn last_trade_ms(&self) -> i64 {
        self.last_trade_ms.load(Ordering::Acquire)
    }

    fn record(&self, ts_ms: i64) {
        self.last_trade_ms.store(ts_ms, Ordering::Release);
    }

    /// Milliseconds since the last trade, never negative.
    pub fn silence_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.last_trade_ms()).max(0)
    }
}

/// Clears the fetch loop's liveness flag however the loop exits.
struct LoopGuard(Arc<AtomicBool>);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Polls trades for one symbol.
pub struct TradeSilenceWatcher {
    ctx: WatcherContext,
    key: MarketKey,
    params: TradeSilenceParams,
    poll_interval: Duration,
    retry: RetryController,
    activity: Arc<TradeActivity>,
    clock: WallClock,
    fetching: Arc<AtomicBool>,
}

impl TradeSilenceWatcher {
    /// Last trade time starts at construction time.
    pub fn new(
        ctx: WatcherContext,
        symbol: &str,
        params: TradeSilenceParams,
        poll_interval: Duration,
    ) -> Self {
        Self::with_clock(ctx, symbol, params, poll_interval, system_clock())
    }

    /// Same as [`TradeSilenceWatcher::new`] with an explicit wall clock.
    pub fn with_clock(
        ctx: WatcherContext,
        symbol: &str,
        params: TradeSilenceParams,
        poll_interval: Duration,
        clock: WallClock,
    ) -> Self {
        let key = ctx.key(symbol);
        let activity = Arc::new(TradeActivity::new(clock()));
        Self {
            ctx,
            key,
            params,
            poll_interval,
            retry: RetryController::new(RetryPolicy::TRADES),
            activity,
            clock,
            fetching: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn key(&self) -> &MarketKey {
        &self.key
    }

    pub fn activity(&self) -> Arc<TradeActivity> {
        Arc::clone(&self.activity)
    }

    /// The timer half of this watcher. It shares the last trade time and
    /// stops once the fetch loop has ended.
    pub fn silence_check(&self) -> SilenceCheck {
        SilenceCheck {
            ctx: self.ctx.clone(),
            key: self.key.clone(),
            params: self.params,
            activity: Arc::clone(&self.activity),
            clock: Arc::clone(&self.clock),
            fetching: Arc::clone(&self.fetching),
            episode: BreachEpisode::default(),
        }
    }

    /// Fetch loop. Runs until stopped or the retry budget is spent.
    pub async fn run(mut self) -> Result<(), WatcherError> {
        let _guard = LoopGuard(Arc::clone(&self.fetching));

        info!(
            "[{}] TradeSilenceWatcher starting (max silence {}s)",
            self.key, self.params.max_silence_time
        );

        while self.ctx.is_running() {
            match self.ctx.source.fetch_trades(&self.key.symbol).await {
                Ok(trades) => {
                    self.retry.record_success();

                    if let Some(last) = trades.last() {
                        let ts = last.timestamp.unwrap_or_else(|| (self.clock)());
                        self.activity.record(ts);
                        debug!("[{}] {} trades, last at {}", self.key, trades.len(), ts);
                    }

                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => match self.retry.record_failure() {
                    RetryDecision::Wait(backoff) => {
                        let delay = e.retry_after().map_or(backoff, |hint| hint.max(backoff));
                        warn!(
                            "[{}] Trade fetch failed (attempt {}), retrying in {}ms: {}",
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
                            "[{}] TradeSilenceWatcher giving up after {} consecutive failures: {}",
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

        info!("[{}] TradeSilenceWatcher stopped", self.key);
        Ok(())
    }
}

impl std::fmt::Debug for TradeSilenceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeSilenceWatcher")
            .field("key", &self.key)
            .field("params", &self.params)
            .field("last_trade_ms", &self.activity.last_trade_ms())
            .finish()
    }
}

/// Periodic silence evaluation for one symbol.
pub struct SilenceCheck {
    ctx: WatcherContext,
    key: MarketKey,
    params: TradeSilenceParams,
    activity: Arc<TradeActivity>,
    clock: WallClock,
    fetching: Arc<AtomicBool>,
    episode: BreachEpisode,
}

impl SilenceCheck {
    /// Ticks every second until the context stops running or the fetch
    /// loop has ended.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + CHECK_PERIOD, CHECK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.ctx.is_running() {
                break;
            }
            if !self.fetching.load(Ordering::Acquire) {
                debug!("[{}] Trade fetch loop ended, silence check exiting", self.key);
                break;
            }
            let now = (self.clock)();
            self.check(now).await;
        }

        debug!("[{}] Silence check stopped", self.key);
    }

    /// Evaluates silence at `now_ms`. Returns whether an alert fired.
    pub async fn check(&mut self, now_ms: i64) -> bool {
        let silence_ms = self.activity.silence_ms(now_ms);
        let silence_secs = silence_ms as f64 / 1000.0;

        if silence_secs <= self.params.max_silence_time {
            if self.episode.clear() {
                info!(
                    "[{}] Trades resumed after {:.0}s silence",
                    self.key, silence_secs
                );
            }
            self.ctx.gate.clear(&self.key.symbol, AlertKind::Silence);
            return false;
        }

        self.episode.breach(Instant::now());
        let message = format!(
            "[{}] No trades for {}s (Threshold: {}s)",
            self.key,
            silence_ms / 1000,
            self.params.max_silence_time
        );
        self.ctx
            .raise_alert(
                &self.key,
                AlertKind::Silence,
                self.params.notification_interval,
                message,
            )
            .await
    }
}

impl std::fmt::Debug for SilenceCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SilenceCheck")
            .field("key", &self.key)
            .field("params", &self.params)
            .field("breached", &self.episode.is_active())
            .finish()
    }
}
