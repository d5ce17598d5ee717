//! Per-(symbol, kind) alert throttling.
//!
//! The throttle table is the one piece of state written by several tasks
//! (depth loop, trade loop, silence timer), so it sits behind a mutex. The
//! lock is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::events::AlertKind;

type ThrottleTable = HashMap<(String, AlertKind), Instant>;

/// Decides whether an alert may be sent now.
#[derive(Debug, Clone, Default)]
pub struct NotificationGate {
    table: Arc<Mutex<ThrottleTable>>,
}

impl NotificationGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, ThrottleTable> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns true (and records now) if no alert of this kind went out for
    /// the symbol within the last `interval_minutes`. Intervals `<= 0`
    /// disable throttling and leave the table untouched.
    pub fn should_notify(&self, symbol: &str, kind: AlertKind, interval_minutes: f64) -> bool {
        if interval_minutes.is_nan() || interval_minutes <= 0.0 {
            return true;
        }

        let window =
            Duration::try_from_secs_f64(interval_minutes * 60.0).unwrap_or(Duration::MAX);
        let now = Instant::now();
        let mut table = self.table();

        let key = (symbol.to_string(), kind);
        match table.get(&key) {
            Some(last) if now.saturating_duration_since(*last) < window => false,
            _ => {
                table.insert(key, now);
                true
            }
        }
    }

    /// Drops the entry for (symbol, kind) so the next breach can alert
    /// without waiting out the previous window. Returns true if one existed.
    pub fn clear(&self, symbol: &str, kind: AlertKind) -> bool {
        self.table().remove(&(symbol.to_string(), kind)).is_some()
    }

    /// When the last alert of this kind was let through, if still tracked.
    pub fn last_notified(&self, symbol: &str, kind: AlertKind) -> Option<Instant> {
        self.table().get(&(symbol.to_string(), kind)).copied()
    }
}
