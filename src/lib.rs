//! stop-guard: Adaptive stop-loss manager for leveraged futures positions
//!
//! This library provides the core components for:
//! - Time-expiring cache shielding the exchange from redundant reads
//! - Rate-limited upstream calls with exponential backoff
//! - ATR volatility estimation from price bars
//! - Multi-strategy stop selection (ATR, percentage, trailing, breakeven, profit ladder)
//! - Adaptive per-symbol monitoring loop
//! - Operator alerts on stop moves and exclusions
//! - Paper exchange for dry runs and tests
//! - Logging and Prometheus metrics

pub mod cache;
pub mod cli;
pub mod config;
pub mod exchange;
pub mod monitor;
pub mod notify;
pub mod ratelimit;
pub mod strategy;
pub mod telemetry;
pub mod volatility;
