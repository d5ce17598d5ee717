//! Market Monitor - Main Entry Point
//!
//! Loads configuration, opens the database and starts one supervisor per
//! configured exchange. Runs until Ctrl+C or SIGTERM, then stops every
//! supervisor before exiting.

use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};

use market_monitor::config::AppConfig;
use market_monitor::connectors::{HttpMarketDataSource, LarkNotifier, LARK_WEBHOOK_ENV};
use market_monitor::monitor::{MonitorSupervisor, SupervisorConfig};
use market_monitor::storage::SqliteStore;
use market_monitor::utils::{init_telemetry, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file found or error loading it: {}", e);
    }

    init_telemetry(LogFormat::from_env());

    info!("Market Monitor v{} starting", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;
    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.database_path))?,
    );

    let notifier = Arc::new(LarkNotifier::from_env());
    if !notifier.is_configured() {
        warn!("{} is not set, alerts will only be logged and stored", LARK_WEBHOOK_ENV);
    }

    let mut supervisors = Vec::new();
    for exchange in &config.exchanges {
        let entries = config.monitors_for(&exchange.id);
        if entries.is_empty() {
            info!("[{}] No monitors configured, skipping", exchange.id.to_uppercase());
            continue;
        }

        let source = HttpMarketDataSource::from_config(exchange)
            .with_context(|| format!("failed to create market data source for {}", exchange.id))?;

        info!(
            "[{}] Monitoring {} symbols",
            exchange.id.to_uppercase(),
            entries.len()
        );

        let mut supervisor = MonitorSupervisor::new(
            Arc::new(source),
            store.clone(),
            notifier.clone(),
            entries,
            SupervisorConfig {
                poll_interval: exchange.poll_interval(),
                ..SupervisorConfig::default()
            },
        );
        supervisor.start();
        supervisors.push(supervisor);
    }

    info!("All supervisors started. Press Ctrl+C to stop.");

    shutdown_signal().await;

    // Stop every exchange concurrently; each is bounded by its own timeout
    let mut handles = Vec::new();
    for mut supervisor in supervisors {
        let exchange = supervisor.exchange().to_uppercase();
        let handle = tokio::spawn(async move { supervisor.stop().await });
        handles.push((exchange, handle));
    }

    for (exchange, handle) in handles {
        match handle.await {
            Ok(report) if report.timed_out => {
                warn!(
                    "[{}] Stopped with {} watchers still running",
                    exchange, report.unfinished
                );
            }
            Ok(report) => {
                info!("[{}] Stopped cleanly ({} watchers)", exchange, report.finished);
            }
            Err(e) => error!("[{}] Supervisor shutdown task failed: {}", exchange, e),
        }
    }

    info!("All supervisors stopped. Shutting down.");
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
