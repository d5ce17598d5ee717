//! Telemetry and structured logging setup.
//!
//! Provides consistent logging across all components with:
//! - `[EXCHANGE SYMBOL]` tagged log lines for filtering
//! - Compact output for terminals, JSON for log aggregation
//! - Configurable verbosity via RUST_LOG

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Filter used when RUST_LOG is not set.
const DEFAULT_FILTER: &str = "info,market_monitor=debug";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Reads `LOG_FORMAT` from the environment (`json` or anything else).
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initializes the telemetry/logging system.
///
/// Example RUST_LOG values:
/// - `info` - All info and above
/// - `market_monitor=debug` - Debug for this crate, default for others
/// - `market_monitor=trace,reqwest=warn` - Trace for us, warn for HTTP
pub fn init_telemetry(format: LogFormat) {
    match format {
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
                .init();
        }
    }
}
