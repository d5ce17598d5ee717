//! Cross-cutting helpers: logging setup, retry backoff and wall-clock time.

mod backoff;
mod telemetry;

pub use backoff::{RetryController, RetryDecision, RetryPolicy};
pub use telemetry::{init_telemetry, LogFormat};

use std::sync::Arc;

/// Source of wall-clock time in epoch milliseconds.
pub type WallClock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// [`WallClock`] backed by the system clock.
pub fn system_clock() -> WallClock {
    Arc::new(now_ms)
}
