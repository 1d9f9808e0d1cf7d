//! Monitoring loop types

use crate::cache::ApproxSize;
use crate::config::MonitoringConfig;
use crate::exchange::{OrderId, Position};
use crate::ratelimit::CallError;
use crate::strategy::HoldReason;
use crate::volatility::VolatilityEstimate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::mem::size_of;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Values stored in the shared upstream cache
#[derive(Debug, Clone)]
pub enum CacheValue {
    Positions(Vec<Position>),
    Price(Decimal),
    Volatility(VolatilityEstimate),
}

impl ApproxSize for CacheValue {
    fn approx_size(&self) -> usize {
        match self {
            CacheValue::Positions(positions) => {
                size_of::<Vec<Position>>()
                    + positions
                        .iter()
                        .map(|p| size_of::<Position>() + p.symbol.len())
                        .sum::<usize>()
            }
            CacheValue::Price(price) => price.approx_size(),
            CacheValue::Volatility(estimate) => {
                size_of::<VolatilityEstimate>() + estimate.symbol.len()
            }
        }
    }
}

/// Per-symbol monitoring mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    /// Polled at the normal interval
    Normal,
    /// Profitable past the aggressive threshold, polled faster
    Aggressive,
    /// Recent upstream failures, polled at the retry interval
    ErrorBackoff,
    /// Fatal upstream error; never processed again
    Excluded,
}

impl std::fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorMode::Normal => write!(f, "normal"),
            MonitorMode::Aggressive => write!(f, "aggressive"),
            MonitorMode::ErrorBackoff => write!(f, "error_backoff"),
            MonitorMode::Excluded => write!(f, "excluded"),
        }
    }
}

/// Scheduling state for one symbol
#[derive(Debug, Clone, Copy)]
pub struct SymbolState {
    pub mode: MonitorMode,
    /// Consecutive cycles that ended in an upstream failure
    pub consecutive_errors: u32,
    /// Earliest instant the symbol is processed again
    pub next_due: Instant,
    /// Last stop this process placed
    pub last_stop: Option<Decimal>,
}

impl SymbolState {
    /// Fresh state, due immediately
    pub fn new(now: Instant) -> Self {
        Self {
            mode: MonitorMode::Normal,
            consecutive_errors: 0,
            next_due: now,
            last_stop: None,
        }
    }

    /// Whether the symbol should be processed at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        self.mode != MonitorMode::Excluded && now >= self.next_due
    }
}

/// Mode for a symbol given its profitability and error streak
pub fn classify(pnl_ratio: Decimal, consecutive_errors: u32, config: &MonitoringConfig) -> MonitorMode {
    if consecutive_errors >= config.error_backoff_threshold {
        MonitorMode::ErrorBackoff
    } else if pnl_ratio > config.aggressive_profit_threshold {
        MonitorMode::Aggressive
    } else {
        MonitorMode::Normal
    }
}

/// Poll interval for a mode
pub fn poll_interval(mode: MonitorMode, config: &MonitoringConfig) -> Duration {
    match mode {
        MonitorMode::ErrorBackoff | MonitorMode::Excluded => config.retry_interval(),
        MonitorMode::Aggressive => config.aggressive_interval(),
        MonitorMode::Normal => config.normal_interval(),
    }
}

/// What happened to a symbol during a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SymbolOutcome {
    /// Stop placed or moved
    Adjusted { stop: Decimal, order_id: OrderId },
    /// Decision matched the placed stop closely enough
    Unchanged { proposed: Decimal },
    /// Engine kept the current stop
    Held { reason: HoldReason },
    /// Exchange refused the stop; retried next cycle
    Rejected { reason: String },
    /// Upstream failure; the symbol backs off or is excluded
    Failed { error: String },
}

/// Per-symbol line of a tick report
#[derive(Debug, Clone, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub mode: MonitorMode,
    #[serde(flatten)]
    pub outcome: SymbolOutcome,
}

/// Result of one monitoring tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Open positions seen this tick
    pub open_positions: usize,
    /// Symbols processed, in processing order
    pub symbols: Vec<SymbolReport>,
    /// Whether the health check ran
    pub health_checked: bool,
}

impl TickReport {
    /// Report line for `symbol`, if it was processed
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.symbols
            .iter()
            .find(|r| r.symbol == symbol)
            .map(|r| &r.outcome)
    }
}

/// Monitoring loop errors
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The global positions fetch failed
    #[error("Position fetch failed: {0}")]
    Positions(#[source] CallError),
}

impl MonitorError {
    /// Whether the loop must stop
    pub fn is_fatal(&self) -> bool {
        match self {
            MonitorError::Positions(err) => err.is_fatal(),
        }
    }
}
