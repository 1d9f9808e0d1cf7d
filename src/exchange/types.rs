//! Exchange boundary types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Stop order identifier returned by the exchange
pub type OrderId = Uuid;

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Profits when price rises, stop sits below price
    Long,
    /// Profits when price falls, stop sits above price
    Short,
}

impl Side {
    /// Direction a protective offset is applied in: -1 for long, +1 for short
    pub fn protective_sign(self) -> Decimal {
        match self {
            Side::Long => Decimal::NEGATIVE_ONE,
            Side::Short => Decimal::ONE,
        }
    }

    /// True when `candidate` is a better (more profitable) price than `current`
    pub fn is_more_favorable(self, candidate: Decimal, current: Decimal) -> bool {
        match self {
            Side::Long => candidate > current,
            Side::Short => candidate < current,
        }
    }

    /// True when `candidate` stop protects more than `current` stop
    pub fn is_tighter(self, candidate: Decimal, current: Decimal) -> bool {
        // A tighter stop moves toward the favorable side
        self.is_more_favorable(candidate, current)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Snapshot of an open leveraged position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Trading symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Position direction
    pub side: Side,
    /// Average entry price
    pub entry_price: Decimal,
    /// Absolute position size
    pub quantity: Decimal,
    /// Mark-to-market profit, before fees
    pub unrealized_pnl: Decimal,
    /// Stop currently attached on the exchange, if any
    #[serde(default)]
    pub stop_price: Option<Decimal>,
}

impl Position {
    /// Whether the position still holds size
    pub fn is_open(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Entry notional (entry price times quantity)
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// Unrealized PnL as a fraction of entry notional
    pub fn pnl_ratio(&self) -> Decimal {
        let notional = self.notional();
        if notional.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / notional
    }

    /// Recompute unrealized PnL against a mark price
    pub fn mark(&mut self, price: Decimal) {
        self.unrealized_pnl = match self.side {
            Side::Long => (price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - price) * self.quantity,
        };
    }
}

/// Closed OHLC bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Bar open time
    pub open_time: DateTime<Utc>,
    /// Bar duration in seconds
    pub duration_secs: u64,
}

/// Errors returned by the upstream exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// Timeout, reset connection or similar network failure
    #[error("Network error: {0}")]
    Network(String),
    /// Upstream throttling signal
    #[error("Rate limited by upstream")]
    RateLimited,
    /// Request rejected as malformed (bad price, bad parameters)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Authentication failure, unknown symbol or other permanent condition
    #[error("Fatal upstream error: {0}")]
    Fatal(String),
}

impl ExchangeError {
    /// Whether a retry can be expected to succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Network(_) | ExchangeError::RateLimited)
    }
}

/// Parse an exchange timeframe string ("1m", "15m", "1h", "1d") into seconds
pub fn timeframe_secs(timeframe: &str) -> Option<u64> {
    let split = timeframe.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = timeframe.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    let unit_secs = match unit {
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return None,
    };
    if amount == 0 {
        return None;
    }
    Some(amount * unit_secs)
}
