//! Monitor configuration.
//!
//! Loaded from a file (name from `MONITOR_CONFIG`, default `config`, any
//! format the `config` crate understands) layered with `MONITOR__`-prefixed
//! environment overrides, then validated before any watcher starts.
//!
//! ```toml
//! database_path = "monitor.db"
//!
//! [[exchanges]]
//! id = "binance"
//! order_book_url = "https://api.binance.com/api/v3/depth?symbol={symbol}&limit=500"
//! trades_url = "https://api.binance.com/api/v3/trades?symbol={symbol}&limit=50"
//! markets = [{ symbol = "BTC/USDT", id = "BTCUSDT" }]
//!
//! [[monitors]]
//! exchange = "binance"
//! symbol = "BTC/USDT"
//! notification_interval = 5
//! depth = { percentage = 2, min_value = 100000, duration = 30 }
//! trade_silence = { max_silence_time = 60 }
//! ```

use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "MONITOR_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub monitors: Vec<MonitorEntry>,
}

/// Connection settings for one exchange's market data source.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub id: String,
    /// Order book URL template; `{symbol}` is replaced by the market id.
    pub order_book_url: String,
    /// Recent trades URL template. Required for trade silence monitors.
    #[serde(default)]
    pub trades_url: Option<String>,
    /// Pause between successful polls of one symbol.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Exchange-native ids for symbols the venue spells differently.
    #[serde(default)]
    pub markets: Vec<MarketMapping>,
}

impl ExchangeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Maps a configured symbol to the id used in requests.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketMapping {
    pub symbol: String,
    pub id: String,
}

/// One monitored (exchange, symbol) pair.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorEntry {
    pub exchange: String,
    pub symbol: String,
    #[serde(default)]
    pub depth: Option<DepthSettings>,
    #[serde(default)]
    pub trade_silence: Option<TradeSilenceSettings>,
    /// Minimum minutes between two alerts of the same kind; `<= 0` disables
    /// throttling.
    #[serde(default)]
    pub notification_interval: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DepthSettings {
    /// Band around mid price, in percent.
    pub percentage: f64,
    /// Minimum quote value per side inside the band.
    pub min_value: f64,
    /// Seconds a breach must last before the first alert.
    #[serde(default)]
    pub duration: f64,
}

impl DepthSettings {
    /// Breach duration as a `Duration`. Values `validate` rejects map to
    /// zero (negative or NaN) or `Duration::MAX` (too large).
    pub fn duration(&self) -> Duration {
        if self.duration.is_nan() || self.duration <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.duration).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TradeSilenceSettings {
    /// Seconds without trades before alerting.
    pub max_silence_time: f64,
}

fn default_database_path() -> String {
    "monitor.db".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl AppConfig {
    /// Loads from the file named by `MONITOR_CONFIG` (default `config`).
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Loads from an explicit file path plus environment overrides.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("MONITOR").separator("__"))
            .build()?;
        Self::from_settings(settings)
    }

    /// Parses configuration text in the given format.
    pub fn parse(text: &str, format: config::FileFormat) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, format))
            .build()?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self, ConfigError> {
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn exchange(&self, id: &str) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.id == id)
    }

    /// Monitor entries for one exchange, in configuration order.
    pub fn monitors_for(&self, exchange: &str) -> Vec<MonitorEntry> {
        self.monitors
            .iter()
            .filter(|m| m.exchange == exchange)
            .cloned()
            .collect()
    }

    /// Checks every entry; the first problem found is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.monitors.is_empty() {
            return invalid("no monitors configured".to_string());
        }

        let mut exchange_ids = HashSet::new();
        for exchange in &self.exchanges {
            if !exchange_ids.insert(exchange.id.as_str()) {
                return invalid(format!("exchange {} is declared twice", exchange.id));
            }
            if exchange.poll_interval_ms == 0 {
                return invalid(format!("exchange {}: poll_interval_ms must be > 0", exchange.id));
            }
        }

        let mut seen = HashSet::new();
        for monitor in &self.monitors {
            let name = format!("{} {}", monitor.exchange, monitor.symbol);

            let Some(exchange) = self.exchange(&monitor.exchange) else {
                return invalid(format!("{}: unknown exchange {}", name, monitor.exchange));
            };
            if !seen.insert((monitor.exchange.as_str(), monitor.symbol.as_str())) {
                return invalid(format!("{}: monitored twice", name));
            }
            if monitor.depth.is_none() && monitor.trade_silence.is_none() {
                return invalid(format!("{}: neither depth nor trade_silence configured", name));
            }
            if !monitor.notification_interval.is_finite() {
                return invalid(format!("{}: notification_interval must be finite", name));
            }

            if let Some(depth) = monitor.depth {
                if !(depth.percentage > 0.0 && depth.percentage <= 100.0) {
                    return invalid(format!("{}: depth.percentage must be in (0, 100]", name));
                }
                if !(depth.min_value.is_finite() && depth.min_value >= 0.0) {
                    return invalid(format!("{}: depth.min_value must be >= 0", name));
                }
                if !(depth.duration.is_finite() && depth.duration >= 0.0) {
                    return invalid(format!("{}: depth.duration must be >= 0", name));
                }
                if Duration::try_from_secs_f64(depth.duration).is_err() {
                    return invalid(format!(
                        "{}: depth.duration {} is too large",
                        name, depth.duration
                    ));
                }
            }

            if let Some(silence) = monitor.trade_silence {
                if !(silence.max_silence_time.is_finite() && silence.max_silence_time >= 0.0) {
                    return invalid(format!(
                        "{}: trade_silence.max_silence_time must be >= 0",
                        name
                    ));
                }
                if exchange.trades_url.is_none() {
                    return invalid(format!(
                        "{}: trade_silence needs trades_url on exchange {}",
                        name, exchange.id
                    ));
                }
            }
        }

        Ok(())
    }
}
