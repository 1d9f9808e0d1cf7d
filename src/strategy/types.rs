//! Stop decision types

use crate::exchange::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Strategy that produced a stop candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    /// Entry offset by a multiple of ATR
    Atr,
    /// Entry offset by a fixed fraction
    Percentage,
    /// Best price seen offset by a fixed fraction
    Trailing,
    /// Entry plus round-trip fees and buffer
    Breakeven,
    /// Breakeven plus locked-in profit steps
    ProfitStep,
    /// Widest allowed first stop
    InitialCap,
}

impl std::fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyTag::Atr => "atr",
            StrategyTag::Percentage => "percentage",
            StrategyTag::Trailing => "trailing",
            StrategyTag::Breakeven => "breakeven",
            StrategyTag::ProfitStep => "profit_step",
            StrategyTag::InitialCap => "initial_cap",
        };
        write!(f, "{}", name)
    }
}

/// Latest observed market state for a symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketState {
    /// Current price
    pub price: Decimal,
    /// Observation time
    pub timestamp: DateTime<Utc>,
}

impl MarketState {
    /// Market state observed now
    pub fn now(price: Decimal) -> Self {
        Self {
            price,
            timestamp: Utc::now(),
        }
    }
}

/// One strategy's proposed stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub strategy: StrategyTag,
    pub price: Decimal,
    /// Correct side of price and far enough from it
    pub valid: bool,
}

/// Stop chosen for a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopDecision {
    /// Trading symbol
    pub symbol: String,
    /// Position direction
    pub side: Side,
    /// Proposed stop price
    pub stop_price: Decimal,
    /// Strategy that produced the chosen stop
    pub strategy: StrategyTag,
    /// Monotonic per-engine sequence number
    pub sequence: u64,
    /// Decision timestamp
    pub computed_at: DateTime<Utc>,
    /// Every candidate considered, valid or not
    pub candidates: Vec<Candidate>,
}

/// Why the engine kept the current stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    /// No strategy produced a candidate
    NoCandidates,
    /// Candidates exist but all sit on the wrong side or too close to price
    NoValidCandidate,
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldReason::NoCandidates => write!(f, "no candidates"),
            HoldReason::NoValidCandidate => write!(f, "no valid candidate"),
        }
    }
}

/// Engine output for one position
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Move or place the stop
    Stop(StopDecision),
    /// Leave the current stop alone
    Hold(HoldReason),
}
