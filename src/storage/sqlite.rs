//! SQLite persistence for depth samples and alerts.
//!
//! rusqlite is blocking, so every statement runs on the blocking pool and
//! watcher tasks never wait on disk I/O inside the runtime.

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use super::{PersistenceSink, StorageError};
use crate::events::{AlertRecord, DepthSample};

/// Columns added to `depth_logs` after its first release.
const LATER_DEPTH_COLUMNS: [&str; 3] = ["mid_price", "bid_quantity", "ask_quantity"];

/// SQLite-backed [`PersistenceSink`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database and prepares the schema.
    pub async fn open(db_path: &str) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let path = db_path.to_string();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StorageError> {
            let conn = Connection::open(&path)?;
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                warn!(path = %path, mode = %mode, "WAL journal mode unavailable");
            }
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            init_schema(&conn)?;
            Ok(conn)
        })
        .await??;

        info!(path = %db_path, "Database initialized");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let guard = match conn.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            op(&guard)
        })
        .await?;
        Ok(result?)
    }

    async fn insert_depth(&self, sample: &DepthSample) -> Result<(), StorageError> {
        let sample = sample.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO depth_logs (exchange, symbol, timestamp, bid_depth_value, ask_depth_value,
                                        mid_price, bid_quantity, ask_quantity)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                rusqlite::params![
                    sample.exchange,
                    sample.symbol,
                    sample.timestamp.timestamp_millis(),
                    sample.bid_depth_value,
                    sample.ask_depth_value,
                    sample.mid_price,
                    sample.bid_quantity,
                    sample.ask_quantity,
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn insert_alert(&self, alert: &AlertRecord) -> Result<(), StorageError> {
        let alert = alert.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO alerts (exchange, symbol, timestamp, message) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    alert.exchange,
                    alert.symbol,
                    alert.timestamp.timestamp_millis(),
                    alert.message,
                ],
            )
            .map(|_| ())
        })
        .await
    }
}

/// Creates tables and migrates older `depth_logs` layouts.
fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS depth_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exchange TEXT,
            symbol TEXT,
            timestamp INTEGER,
            bid_depth_value REAL,
            ask_depth_value REAL,
            mid_price REAL,
            bid_quantity REAL,
            ask_quantity REAL
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exchange TEXT,
            symbol TEXT,
            timestamp INTEGER,
            message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_depth_logs_symbol_ts
            ON depth_logs(exchange, symbol, timestamp);
        CREATE INDEX IF NOT EXISTS idx_alerts_symbol_ts
            ON alerts(exchange, symbol, timestamp);
        "#,
    )?;

    let mut stmt = conn.prepare("PRAGMA table_info(depth_logs)")?;
    let existing = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    drop(stmt);

    for column in LATER_DEPTH_COLUMNS {
        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(&format!("ALTER TABLE depth_logs ADD COLUMN {} REAL", column))?;
            info!("Migrated depth_logs: added column {}", column);
        }
    }

    Ok(())
}

#[async_trait]
impl PersistenceSink for SqliteStore {
    async fn record_depth(&self, sample: &DepthSample) {
        if let Err(e) = self.insert_depth(sample).await {
            error!(
                "[{} {}] Failed to record depth sample: {}",
                sample.exchange.to_uppercase(),
                sample.symbol,
                e
            );
        }
    }

    async fn record_alert(&self, alert: &AlertRecord) {
        if let Err(e) = self.insert_alert(alert).await {
            error!(
                "[{} {}] Failed to record alert: {}",
                alert.exchange.to_uppercase(),
                alert.symbol,
                e
            );
        }
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample() -> DepthSample {
        DepthSample {
            exchange: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            timestamp: Utc::now(),
            bid_depth_value: 1000.0,
            ask_depth_value: 2000.0,
            mid_price: 50000.0,
            bid_quantity: 0.02,
            ask_quantity: 0.04,
        }
    }

    #[tokio::test]
    async fn test_storage_init_creates_nested_dirs() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("monitor.db");

        let store = SqliteStore::open(db_path.to_str().unwrap()).await;
        assert!(store.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_record_depth_round_trip() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("monitor.db");
        let store = SqliteStore::open(db_path.to_str().unwrap()).await.unwrap();

        let sample = sample();
        store.record_depth(&sample).await;

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let (ts, bid, mid, bid_qty): (i64, f64, f64, f64) = conn
            .query_row(
                "SELECT timestamp, bid_depth_value, mid_price, bid_quantity FROM depth_logs",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(ts, sample.timestamp.timestamp_millis());
        assert_eq!(bid, 1000.0);
        assert_eq!(mid, 50000.0);
        assert_eq!(bid_qty, 0.02);
    }

    #[tokio::test]
    async fn test_record_alert() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("monitor.db");
        let store = SqliteStore::open(db_path.to_str().unwrap()).await.unwrap();

        let alert = AlertRecord {
            exchange: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            timestamp: Utc::now(),
            message: "No trades for 65s (Threshold: 60s)".to_string(),
        };
        store.record_alert(&alert).await;
        store.record_alert(&alert).await;

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_migrates_legacy_depth_table() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("legacy.db");
        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE depth_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    exchange TEXT, symbol TEXT, timestamp INTEGER,
                    bid_depth_value REAL, ask_depth_value REAL
                )",
            )
            .unwrap();
        }

        let store = SqliteStore::open(db_path.to_str().unwrap()).await.unwrap();
        store.record_depth(&sample()).await;

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let ask_qty: f64 = conn
            .query_row("SELECT ask_quantity FROM depth_logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(ask_qty, 0.04);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_writes_run_off_the_runtime_thread() {
        // On a current-thread runtime a write done inline would run on this
        // thread; the store must hand it to the blocking pool instead.
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("monitor.db");
        let store = SqliteStore::open(db_path.to_str().unwrap()).await.unwrap();

        let runtime_thread = std::thread::current().id();
        let write_thread = store
            .with_conn(|_conn| Ok(std::thread::current().id()))
            .await
            .unwrap();
        assert_ne!(write_thread, runtime_thread);

        store.record_depth(&sample()).await;
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM depth_logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("monitor.db");
        let path = db_path.to_str().unwrap();

        drop(SqliteStore::open(path).await.unwrap());
        assert!(SqliteStore::open(path).await.is_ok());
    }
}
