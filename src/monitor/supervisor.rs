//! Exchange supervisor that owns every watcher task on one exchange.
//!
//! Watchers on one exchange share a data source, a stop flag and a throttle
//! table, and nothing else. A watcher that gives up does not take its
//! siblings down with it.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::MonitorEntry;
use crate::connectors::{MarketDataSource, NotificationSink};
use crate::events::MarketKey;
use crate::storage::PersistenceSink;
use crate::watchers::{
    DepthWatchParams, DepthWatcher, NotificationGate, TradeSilenceParams, TradeSilenceWatcher,
    WatcherContext, WatcherError,
};

/// Timing knobs for one supervisor.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Upper bound on how long `stop` waits for watcher loops.
    pub shutdown_timeout: Duration,
    /// How often `stop` checks whether the loops have ended.
    pub shutdown_poll_interval: Duration,
    /// Wait between successful fetches in every watcher loop.
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            shutdown_poll_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Outcome of [`MonitorSupervisor::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Watcher loops that had ended when `stop` returned.
    pub finished: usize,
    /// Watcher loops still running when the timeout hit.
    pub unfinished: usize,
    pub timed_out: bool,
}

struct WatcherTask {
    name: &'static str,
    key: MarketKey,
    handle: JoinHandle<Result<(), WatcherError>>,
}

/// Starts and stops the watchers for one exchange.
pub struct MonitorSupervisor {
    ctx: WatcherContext,
    entries: Vec<MonitorEntry>,
    config: SupervisorConfig,
    watchers: Vec<WatcherTask>,
    timers: Vec<JoinHandle<()>>,
}

impl MonitorSupervisor {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        persistence: Arc<dyn PersistenceSink>,
        notifier: Arc<dyn NotificationSink>,
        entries: Vec<MonitorEntry>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            ctx: WatcherContext::new(source, persistence, notifier),
            entries,
            config,
            watchers: Vec::new(),
            timers: Vec::new(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.ctx.exchange
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }

    /// Throttle table shared by this exchange's watchers.
    pub fn gate(&self) -> &NotificationGate {
        &self.ctx.gate
    }

    /// Number of watcher loops that have not ended yet.
    pub fn active_watchers(&self) -> usize {
        self.watchers
            .iter()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    /// Spawns the configured watchers. Calling it while running is a no-op.
    pub fn start(&mut self) {
        if self.ctx.is_running() {
            warn!("[{}] Supervisor already running", self.ctx.exchange.to_uppercase());
            return;
        }
        self.ctx.set_running(true);

        let poll_interval = self.config.poll_interval;
        for entry in &self.entries {
            if let Some(depth) = entry.depth {
                let params = DepthWatchParams {
                    percentage: depth.percentage,
                    min_value: depth.min_value,
                    notification_interval: entry.notification_interval,
                    duration: depth.duration(),
                };
                let watcher =
                    DepthWatcher::new(self.ctx.clone(), &entry.symbol, params, poll_interval);
                let key = watcher.key().clone();
                self.watchers.push(WatcherTask {
                    name: "DepthWatcher",
                    key,
                    handle: tokio::spawn(watcher.run()),
                });
            }

            if let Some(silence) = entry.trade_silence {
                let params = TradeSilenceParams {
                    max_silence_time: silence.max_silence_time,
                    notification_interval: entry.notification_interval,
                };
                let watcher = TradeSilenceWatcher::new(
                    self.ctx.clone(),
                    &entry.symbol,
                    params,
                    poll_interval,
                );
                let key = watcher.key().clone();
                self.timers.push(tokio::spawn(watcher.silence_check().run()));
                self.watchers.push(WatcherTask {
                    name: "TradeSilenceWatcher",
                    key,
                    handle: tokio::spawn(watcher.run()),
                });
            }
        }

        info!(
            "[{}] Supervisor started {} watchers and {} silence timers",
            self.ctx.exchange.to_uppercase(),
            self.watchers.len(),
            self.timers.len()
        );
    }

    /// Stops every watcher and closes the data source.
    ///
    /// Loops observe the stop at their next iteration boundary; a loop stuck
    /// in a fetch is left behind once the timeout passes. The source is
    /// closed either way.
    pub async fn stop(&mut self) -> ShutdownReport {
        let exchange = self.ctx.exchange.to_uppercase();
        info!("[{}] Supervisor stopping", exchange);
        self.ctx.set_running(false);

        for timer in self.timers.drain(..) {
            timer.abort();
        }

        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut timed_out = false;
        while self.active_watchers() > 0 {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            tokio::time::sleep(self.config.shutdown_poll_interval).await;
        }

        let mut report = ShutdownReport {
            timed_out,
            ..ShutdownReport::default()
        };
        for task in self.watchers.drain(..) {
            if !task.handle.is_finished() {
                warn!("[{}] {} did not stop in time", task.key, task.name);
                report.unfinished += 1;
                continue;
            }

            report.finished += 1;
            match task.handle.await {
                Ok(Ok(())) => debug!("[{}] {} finished", task.key, task.name),
                Ok(Err(e)) => warn!("[{}] {} had already terminated: {}", task.key, task.name, e),
                Err(e) => error!("[{}] {} task failed: {}", task.key, task.name, e),
            }
        }

        self.ctx.source.close().await;

        if timed_out {
            warn!(
                "[{}] Shutdown timed out after {}ms with {} watchers still running",
                exchange,
                self.config.shutdown_timeout.as_millis(),
                report.unfinished
            );
        } else {
            info!("[{}] Supervisor stopped ({} watchers)", exchange, report.finished);
        }
        report
    }
}

impl std::fmt::Debug for MonitorSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSupervisor")
            .field("exchange", &self.ctx.exchange)
            .field("running", &self.is_running())
            .field("watchers", &self.watchers.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DepthSettings, TradeSilenceSettings};
    use crate::events::Trade;
    use crate::utils::now_ms;
    use crate::watchers::testing::{
        book, RecordingNotifier, RecordingStore, ScriptedSource, SYMBOL,
    };
    use std::sync::atomic::Ordering;

    fn entry(depth: bool, silence: bool) -> MonitorEntry {
        MonitorEntry {
            exchange: "binance".to_string(),
            symbol: SYMBOL.to_string(),
            depth: depth.then_some(DepthSettings {
                percentage: 2.0,
                min_value: 100.0,
                duration: 0.0,
            }),
            trade_silence: silence.then_some(TradeSilenceSettings {
                max_silence_time: 60.0,
            }),
            notification_interval: 1.0,
        }
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_millis(100),
            ..SupervisorConfig::default()
        }
    }

    fn supervisor(source: Arc<ScriptedSource>, entries: Vec<MonitorEntry>) -> MonitorSupervisor {
        MonitorSupervisor::new(
            source,
            Arc::new(RecordingStore::default()),
            Arc::new(RecordingNotifier::default()),
            entries,
            config(),
        )
    }

    fn healthy_source() -> Arc<ScriptedSource> {
        Arc::new(
            ScriptedSource::new()
                .with_book(book((100.0, 10.0), (101.0, 10.0)))
                .with_trades(vec![Trade::at(now_ms())]),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_spawns_watchers_per_entry() {
        let mut sup = supervisor(healthy_source(), vec![entry(true, true)]);
        sup.start();
        assert!(sup.is_running());
        assert_eq!(sup.active_watchers(), 2);
        assert_eq!(sup.timers.len(), 1);

        // Second start is ignored.
        sup.start();
        assert_eq!(sup.active_watchers(), 2);

        sup.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_finishes_and_closes_source() {
        let source = healthy_source();
        let mut sup = supervisor(source.clone(), vec![entry(true, true)]);
        sup.start();
        tokio::time::sleep(Duration::from_millis(350)).await;

        let report = sup.stop().await;
        assert_eq!(
            report,
            ShutdownReport {
                finished: 2,
                unfinished: 0,
                timed_out: false
            }
        );
        assert!(!sup.is_running());
        assert!(sup.timers.is_empty());
        assert!(source.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_times_out_on_hanging_fetch() {
        let source = Arc::new(ScriptedSource::new().hanging());
        let mut sup = supervisor(source.clone(), vec![entry(true, false)]);
        sup.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        let report = sup.stop().await;

        assert!(report.timed_out);
        assert_eq!(report.unfinished, 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert!(source.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_watcher_is_observable_and_isolated() {
        // Book fetches fail forever; trades keep flowing.
        let source = Arc::new(ScriptedSource::new().with_trades(vec![Trade::at(now_ms())]));
        let mut sup = supervisor(source.clone(), vec![entry(true, true)]);
        sup.start();

        // Backoff for nine failures totals 243s.
        tokio::time::sleep(Duration::from_secs(250)).await;
        assert_eq!(sup.active_watchers(), 1);

        let report = sup.stop().await;
        assert_eq!(report.finished, 2);
        assert!(!report.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_timer_ends_with_its_trade_watcher() {
        // Trades fail forever; the depth side stays healthy.
        let source = Arc::new(ScriptedSource::new().with_book(book((100.0, 10.0), (101.0, 10.0))));
        let mut sup = supervisor(source, vec![entry(true, true)]);
        sup.start();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!sup.timers[0].is_finished());

        // Trade backoff for nine failures totals 375s.
        tokio::time::sleep(Duration::from_secs(320)).await;
        assert_eq!(sup.active_watchers(), 1);
        assert!(sup.timers[0].is_finished());
        assert!(sup.is_running());

        let report = sup.stop().await;
        assert_eq!(report.finished, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchers_share_the_gate() {
        let sup = supervisor(healthy_source(), vec![]);
        let gate = sup.gate().clone();
        assert!(gate.should_notify(SYMBOL, crate::events::AlertKind::Silence, 5.0));
        assert!(!sup
            .gate()
            .should_notify(SYMBOL, crate::events::AlertKind::Silence, 5.0));
    }
}
