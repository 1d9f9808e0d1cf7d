//! Alert types

use crate::strategy::StrategyTag;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Event worth telling an operator about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "alert", rename_all = "snake_case")]
pub enum Alert {
    /// A stop was placed or moved
    StopAdjusted {
        symbol: String,
        previous: Option<Decimal>,
        stop: Decimal,
        strategy: StrategyTag,
    },
    /// A symbol hit a fatal upstream error and is no longer monitored
    SymbolExcluded { symbol: String, error: String },
}

impl Alert {
    pub fn symbol(&self) -> &str {
        match self {
            Alert::StopAdjusted { symbol, .. } | Alert::SymbolExcluded { symbol, .. } => symbol,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::StopAdjusted {
                symbol,
                previous: Some(previous),
                stop,
                strategy,
            } => write!(f, "{symbol}: stop moved {previous} -> {stop} ({strategy})"),
            Alert::StopAdjusted {
                symbol,
                previous: None,
                stop,
                strategy,
            } => write!(f, "{symbol}: stop placed at {stop} ({strategy})"),
            Alert::SymbolExcluded { symbol, error } => {
                write!(f, "{symbol}: excluded from monitoring: {error}")
            }
        }
    }
}

/// Alert delivery failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),
    #[error("Alert delivery timed out")]
    Timeout,
}
