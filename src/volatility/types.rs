//! Volatility types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Average true range for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityEstimate {
    /// Trading symbol
    pub symbol: String,
    /// Number of true ranges averaged
    pub period: usize,
    /// ATR in price units, never negative
    pub value: Decimal,
    /// When the estimate was computed
    pub computed_at: DateTime<Utc>,
}

/// Reasons an estimate could not be produced
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolatilityError {
    #[error("Insufficient price history: have {have} bars, need {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("Invalid ATR period: {0}, must be greater than 0")]
    InvalidPeriod(usize),
}
