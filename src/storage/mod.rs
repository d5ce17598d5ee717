//! Persistence of depth samples and fired alerts.
//!
//! Writes are best-effort: a [`PersistenceSink`] logs its own failures and
//! never hands them back to a watcher.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::events::{AlertRecord, DepthSample};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Records monitor output.
#[async_trait]
pub trait PersistenceSink: Send + Sync + 'static {
    async fn record_depth(&self, sample: &DepthSample);

    async fn record_alert(&self, alert: &AlertRecord);
}
