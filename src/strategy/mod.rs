//! Stop strategy module
//!
//! Computes candidate stops from several signal sources and selects the most
//! protective valid one. Trailing memory lives inside the engine, keyed by
//! symbol.

mod engine;
mod types;

pub use engine::{needs_adjustment, StopStrategyEngine};
pub use types::{Candidate, Decision, HoldReason, MarketState, StopDecision, StrategyTag};
