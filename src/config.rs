//! Configuration types for stop-guard

use crate::ratelimit::{RateLimiter, RetryPolicy};
use crate::telemetry::LogFormat;
use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub stop_loss: StopLossConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
    #[error("{field} must not be negative")]
    Negative { field: &'static str },
    #[error("Unknown timeframe: {0}")]
    InvalidTimeframe(String),
}

/// Upstream call budget and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Calls allowed per second
    #[serde(default = "default_calls_per_second")]
    pub calls_per_second: u32,
    /// Retries after the first attempt of a transient failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles every retry
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    /// Ceiling for any single backoff delay
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    /// Time limit for a single upstream attempt
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_calls_per_second() -> u32 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_retry_delay_ms() -> u64 {
    1_000
}
fn default_max_retry_delay_ms() -> u64 {
    30_000
}
fn default_call_timeout_ms() -> u64 {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            calls_per_second: 10,
            max_retries: 3,
            base_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl ApiConfig {
    /// Retry policy for upstream calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_retry_delay_ms))
            .max_delay(Duration::from_millis(self.max_retry_delay_ms))
            .call_timeout(Duration::from_millis(self.call_timeout_ms))
    }

    /// Limiter enforcing `calls_per_second`
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::per_second(self.calls_per_second)
    }
}

/// Polling cadence and adjustment gating
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Poll interval for positions below the aggressive threshold (seconds)
    #[serde(default = "default_normal_interval")]
    pub normal_interval_secs: u64,
    /// Poll interval once profit passes the aggressive threshold (seconds)
    #[serde(default = "default_aggressive_interval")]
    pub aggressive_interval_secs: u64,
    /// Poll interval while a symbol is backing off after errors (seconds)
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Health check cadence (seconds)
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    /// PnL over entry notional that switches a symbol to aggressive polling
    #[serde(default = "default_aggressive_profit_threshold")]
    pub aggressive_profit_threshold: Decimal,
    /// Consecutive exhausted failures before a symbol backs off
    #[serde(default = "default_error_backoff_threshold")]
    pub error_backoff_threshold: u32,
    /// Smallest stop move worth sending, as a fraction of current price
    #[serde(default = "default_min_move_threshold")]
    pub min_move_threshold: Decimal,
    /// Allow a new stop further from price than the placed one
    #[serde(default)]
    pub allow_loosening: bool,
    /// How long an in-flight tick may run after shutdown is requested (seconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_normal_interval() -> u64 {
    30
}
fn default_aggressive_interval() -> u64 {
    10
}
fn default_retry_interval() -> u64 {
    60
}
fn default_health_check_interval() -> u64 {
    300
}
fn default_aggressive_profit_threshold() -> Decimal {
    Decimal::new(1, 2) // 0.01 = 1%
}
fn default_error_backoff_threshold() -> u32 {
    1
}
fn default_min_move_threshold() -> Decimal {
    Decimal::new(5, 4) // 0.0005 = 0.05%
}
fn default_shutdown_grace() -> u64 {
    10
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            normal_interval_secs: 30,
            aggressive_interval_secs: 10,
            retry_interval_secs: 60,
            health_check_interval_secs: 300,
            aggressive_profit_threshold: Decimal::new(1, 2),
            error_backoff_threshold: 1,
            min_move_threshold: Decimal::new(5, 4),
            allow_loosening: false,
            shutdown_grace_secs: 10,
        }
    }
}

impl MonitoringConfig {
    pub fn normal_interval(&self) -> Duration {
        Duration::from_secs(self.normal_interval_secs)
    }

    pub fn aggressive_interval(&self) -> Duration {
        Duration::from_secs(self.aggressive_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Stop price strategy parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossConfig {
    /// True ranges averaged for ATR
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    /// ATR stop distance multiplier
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: Decimal,
    /// Bar timeframe used for ATR ("15m", "1h")
    #[serde(default = "default_atr_timeframe")]
    pub atr_timeframe: String,
    /// Fixed stop distance as a fraction of entry
    #[serde(default = "default_risk_percentage")]
    pub risk_percentage: Decimal,
    /// Trailing distance as a fraction of the best price seen
    #[serde(default = "default_trailing_stop_percentage")]
    pub trailing_stop_percentage: Decimal,
    /// Minimum distance between stop and price, as a fraction of price
    #[serde(default = "default_min_stop_distance")]
    pub min_stop_distance: Decimal,
    /// Net profit over entry notional required before moving to breakeven
    #[serde(default = "default_breakeven_threshold")]
    pub breakeven_threshold: Decimal,
    /// Extra margin past breakeven, as a fraction of entry
    #[serde(default = "default_breakeven_buffer")]
    pub breakeven_buffer: Decimal,
    /// Taker fee charged on each side of the round trip
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: Decimal,
    /// Profit ladder step, as a fraction of entry notional
    #[serde(default = "default_profit_step")]
    pub profit_step: Decimal,
    /// Distance of the first stop for a position without one
    #[serde(default = "default_max_initial_distance")]
    pub max_initial_distance: Decimal,
    /// Decimal places stop prices are rounded to
    #[serde(default)]
    pub price_precision: Option<u32>,
}

fn default_atr_period() -> usize {
    14
}
fn default_atr_multiplier() -> Decimal {
    Decimal::new(2, 0)
}
fn default_atr_timeframe() -> String {
    "15m".to_string()
}
fn default_risk_percentage() -> Decimal {
    Decimal::new(2, 2) // 0.02 = 2%
}
fn default_trailing_stop_percentage() -> Decimal {
    Decimal::new(1, 2) // 0.01 = 1%
}
fn default_min_stop_distance() -> Decimal {
    Decimal::new(5, 3) // 0.005 = 0.5%
}
fn default_breakeven_threshold() -> Decimal {
    Decimal::new(5, 3) // 0.005 = 0.5%
}
fn default_breakeven_buffer() -> Decimal {
    Decimal::new(1, 3) // 0.001 = 0.1%
}
fn default_taker_fee_rate() -> Decimal {
    Decimal::new(5, 4) // 0.0005 = 0.05%
}
fn default_profit_step() -> Decimal {
    Decimal::new(5, 3) // 0.005 = 0.5%
}
fn default_max_initial_distance() -> Decimal {
    Decimal::new(3, 2) // 0.03 = 3%
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_multiplier: Decimal::new(2, 0),
            atr_timeframe: "15m".to_string(),
            risk_percentage: Decimal::new(2, 2),
            trailing_stop_percentage: Decimal::new(1, 2),
            min_stop_distance: Decimal::new(5, 3),
            breakeven_threshold: Decimal::new(5, 3),
            breakeven_buffer: Decimal::new(1, 3),
            taker_fee_rate: Decimal::new(5, 4),
            profit_step: Decimal::new(5, 3),
            max_initial_distance: Decimal::new(3, 2),
            price_precision: None,
        }
    }
}

/// Strategy enable flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default = "default_true")]
    pub atr: bool,
    #[serde(default = "default_true")]
    pub percentage: bool,
    #[serde(default = "default_true")]
    pub trailing: bool,
    #[serde(default = "default_true")]
    pub breakeven: bool,
    #[serde(default = "default_true")]
    pub profit_step: bool,
    #[serde(default = "default_true")]
    pub initial_cap: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            atr: true,
            percentage: true,
            trailing: true,
            breakeven: true,
            profit_step: true,
            initial_cap: true,
        }
    }
}

/// Cache ttls per key space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_position_ttl")]
    pub position_ttl_secs: u64,
    #[serde(default = "default_price_ttl")]
    pub price_ttl_secs: u64,
    #[serde(default = "default_atr_ttl")]
    pub atr_ttl_secs: u64,
    /// Age after which a sweep drops any entry
    #[serde(default = "default_sweep_horizon")]
    pub sweep_horizon_secs: u64,
}

fn default_position_ttl() -> u64 {
    30
}
fn default_price_ttl() -> u64 {
    5
}
fn default_atr_ttl() -> u64 {
    300
}
fn default_sweep_horizon() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            position_ttl_secs: 30,
            price_ttl_secs: 5,
            atr_ttl_secs: 300,
            sweep_horizon_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn position_ttl(&self) -> Duration {
        Duration::from_secs(self.position_ttl_secs)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }

    pub fn atr_ttl(&self) -> Duration {
        Duration::from_secs(self.atr_ttl_secs)
    }

    pub fn sweep_horizon(&self) -> Duration {
        Duration::from_secs(self.sweep_horizon_secs)
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Bundled defaults used when no config file exists
pub const EXAMPLE_CONFIG: &str = include_str!("../config.toml.example");

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load `path`, or the bundled example when the file does not exist
    ///
    /// A file that exists but cannot be read, parsed or validated is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                eprintln!("Warning: No config at {}, using defaults", path.display());
                Self::parse(EXAMPLE_CONFIG).context("Invalid bundled example config")
            }
            Err(e) => Err(e).with_context(|| format!("Could not read config {}", path.display())),
        }
    }

    /// Parse and validate TOML
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::NotPositive { field });
            }
            Ok(())
        }
        fn non_negative(field: &'static str, value: Decimal) -> Result<(), ConfigError> {
            if value < Decimal::ZERO {
                return Err(ConfigError::Negative { field });
            }
            Ok(())
        }

        positive("api.calls_per_second", self.api.calls_per_second.into())?;
        positive("api.call_timeout_ms", self.api.call_timeout_ms)?;
        positive("monitoring.normal_interval_secs", self.monitoring.normal_interval_secs)?;
        positive(
            "monitoring.aggressive_interval_secs",
            self.monitoring.aggressive_interval_secs,
        )?;
        positive("monitoring.retry_interval_secs", self.monitoring.retry_interval_secs)?;
        positive(
            "monitoring.health_check_interval_secs",
            self.monitoring.health_check_interval_secs,
        )?;
        positive(
            "monitoring.error_backoff_threshold",
            self.monitoring.error_backoff_threshold.into(),
        )?;
        positive("stop_loss.atr_period", self.stop_loss.atr_period as u64)?;

        let sl = &self.stop_loss;
        non_negative("stop_loss.atr_multiplier", sl.atr_multiplier)?;
        non_negative("stop_loss.risk_percentage", sl.risk_percentage)?;
        non_negative("stop_loss.trailing_stop_percentage", sl.trailing_stop_percentage)?;
        non_negative("stop_loss.min_stop_distance", sl.min_stop_distance)?;
        non_negative("stop_loss.breakeven_threshold", sl.breakeven_threshold)?;
        non_negative("stop_loss.breakeven_buffer", sl.breakeven_buffer)?;
        non_negative("stop_loss.taker_fee_rate", sl.taker_fee_rate)?;
        non_negative("stop_loss.profit_step", sl.profit_step)?;
        non_negative("stop_loss.max_initial_distance", sl.max_initial_distance)?;
        non_negative(
            "monitoring.aggressive_profit_threshold",
            self.monitoring.aggressive_profit_threshold,
        )?;
        non_negative("monitoring.min_move_threshold", self.monitoring.min_move_threshold)?;

        if crate::exchange::timeframe_secs(&sl.atr_timeframe).is_none() {
            return Err(ConfigError::InvalidTimeframe(sl.atr_timeframe.clone()));
        }
        Ok(())
    }
}
