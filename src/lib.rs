//! Market Monitor - exchange liquidity and trade activity alerts
//!
//! Watches configured (exchange, symbol) pairs for two conditions:
//! - Order book depth within a band around mid price dropping below a minimum
//!   value for longer than a configured duration
//! - No trades for longer than a configured silence time
//!
//! Every depth measurement and every fired alert is persisted; alerts are
//! pushed to a Lark webhook and throttled per (symbol, alert kind).
//!
//! # Architecture
//!
//! - **One task per watcher**: each depth loop, trade loop and silence timer
//!   runs on its own tokio task
//! - **Exchange isolation**: one supervisor per exchange, sharing nothing with
//!   the others
//! - **Best-effort sinks**: persistence and notification failures are logged
//!   and never stop a watcher
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use market_monitor::config::AppConfig;
//! use market_monitor::connectors::{HttpMarketDataSource, LarkNotifier};
//! use market_monitor::monitor::{MonitorSupervisor, SupervisorConfig};
//! use market_monitor::storage::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let store = Arc::new(SqliteStore::open(&config.database_path).await?);
//!     let notifier = Arc::new(LarkNotifier::from_env());
//!
//!     let exchange = &config.exchanges[0];
//!     let source = Arc::new(HttpMarketDataSource::from_config(exchange)?);
//!     let mut supervisor = MonitorSupervisor::new(
//!         source,
//!         store,
//!         notifier,
//!         config.monitors_for(&exchange.id),
//!         SupervisorConfig::default(),
//!     );
//!
//!     supervisor.start();
//!     tokio::signal::ctrl_c().await?;
//!     supervisor.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectors;
pub mod events;
pub mod monitor;
pub mod storage;
pub mod utils;
pub mod watchers;

// Re-export commonly used types
pub use crate::config::AppConfig;
pub use connectors::{HttpMarketDataSource, LarkNotifier};
pub use events::{AlertKind, MarketKey};
pub use monitor::{MonitorSupervisor, ShutdownReport};
pub use storage::SqliteStore;
