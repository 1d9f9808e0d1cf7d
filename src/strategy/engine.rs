//! Stop strategy engine

use super::{Candidate, Decision, HoldReason, MarketState, StopDecision, StrategyTag};
use crate::config::{StopLossConfig, StrategiesConfig};
use crate::exchange::{Position, Side};
use crate::volatility::VolatilityEstimate;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

/// Best price seen for an open position
#[derive(Debug, Clone)]
struct TrailingState {
    side: Side,
    entry_price: Decimal,
    best_price: Decimal,
}

/// Computes stop candidates per strategy and picks the final stop
pub struct StopStrategyEngine {
    params: StopLossConfig,
    enabled: StrategiesConfig,
    trailing: HashMap<String, TrailingState>,
    sequence: u64,
}

impl StopStrategyEngine {
    /// Create a new engine
    pub fn new(params: StopLossConfig, enabled: StrategiesConfig) -> Self {
        Self {
            params,
            enabled,
            trailing: HashMap::new(),
            sequence: 0,
        }
    }

    /// Decide the stop for `position` at the given market state
    ///
    /// Returns `None` for a position without size. `volatility` is `None`
    /// when there was not enough history, in which case ATR is skipped.
    pub fn decide(
        &mut self,
        position: &Position,
        market: &MarketState,
        volatility: Option<&VolatilityEstimate>,
    ) -> Option<Decision> {
        if !position.is_open() {
            return None;
        }

        let side = position.side;
        let sign = side.protective_sign();
        let entry = position.entry_price;
        let price = market.price;
        let mut raw: Vec<(StrategyTag, Decimal)> = Vec::new();

        let best = self.update_trailing(position, price);

        if self.enabled.atr {
            if let Some(estimate) = volatility {
                raw.push((
                    StrategyTag::Atr,
                    entry + sign * estimate.value * self.params.atr_multiplier,
                ));
            }
        }

        if self.enabled.percentage {
            raw.push((
                StrategyTag::Percentage,
                entry + sign * entry * self.params.risk_percentage,
            ));
        }

        if self.enabled.trailing {
            raw.push((
                StrategyTag::Trailing,
                best + sign * best * self.params.trailing_stop_percentage,
            ));
        }

        if let Some(breakeven) = self.breakeven_price(position) {
            if self.enabled.breakeven {
                raw.push((StrategyTag::Breakeven, breakeven));
            }
            if self.enabled.profit_step {
                if let Some(step) = self.profit_step_price(position, breakeven) {
                    raw.push((StrategyTag::ProfitStep, step));
                }
            }
        }

        if self.enabled.initial_cap && position.stop_price.is_none() {
            raw.push((
                StrategyTag::InitialCap,
                entry + sign * entry * self.params.max_initial_distance,
            ));
        }

        let candidates: Vec<Candidate> = raw
            .into_iter()
            .map(|(strategy, stop)| {
                let stop = self.round(stop);
                Candidate {
                    strategy,
                    price: stop,
                    valid: self.is_valid(side, stop, price),
                }
            })
            .collect();

        if candidates.is_empty() {
            return Some(Decision::Hold(HoldReason::NoCandidates));
        }

        // Most protective valid stop: highest for long, lowest for short
        let chosen = candidates
            .iter()
            .filter(|c| c.valid)
            .fold(None::<&Candidate>, |acc, c| match acc {
                Some(best) if !side.is_tighter(c.price, best.price) => Some(best),
                _ => Some(c),
            })
            .copied();

        let Some(chosen) = chosen else {
            tracing::debug!(
                symbol = %position.symbol,
                price = %price,
                candidates = candidates.len(),
                "No valid stop candidate"
            );
            return Some(Decision::Hold(HoldReason::NoValidCandidate));
        };

        self.sequence += 1;
        Some(Decision::Stop(StopDecision {
            symbol: position.symbol.clone(),
            side,
            stop_price: chosen.price,
            strategy: chosen.strategy,
            sequence: self.sequence,
            computed_at: market.timestamp,
            candidates,
        }))
    }

    /// Drop trailing state for a closed position
    pub fn forget(&mut self, symbol: &str) {
        self.trailing.remove(symbol);
    }

    /// Best price tracked for `symbol`
    pub fn best_price(&self, symbol: &str) -> Option<Decimal> {
        self.trailing.get(symbol).map(|t| t.best_price)
    }

    /// Symbols with trailing state
    pub fn tracked_symbols(&self) -> impl Iterator<Item = &str> {
        self.trailing.keys().map(String::as_str)
    }

    /// Round-trip taker fee for the whole position
    pub fn round_trip_fee(&self, position: &Position) -> Decimal {
        Decimal::TWO * position.notional() * self.params.taker_fee_rate
    }

    /// Unrealized PnL after round-trip fees
    pub fn net_profit(&self, position: &Position) -> Decimal {
        position.unrealized_pnl - self.round_trip_fee(position)
    }

    fn update_trailing(&mut self, position: &Position, price: Decimal) -> Decimal {
        let state = self
            .trailing
            .entry(position.symbol.clone())
            .or_insert_with(|| TrailingState {
                side: position.side,
                entry_price: position.entry_price,
                best_price: position.entry_price,
            });

        // Reopened position: start over from the new entry
        if state.side != position.side || state.entry_price != position.entry_price {
            tracing::debug!(symbol = %position.symbol, "Position changed, resetting trailing state");
            *state = TrailingState {
                side: position.side,
                entry_price: position.entry_price,
                best_price: position.entry_price,
            };
        }

        if position.side.is_more_favorable(price, state.best_price) {
            state.best_price = price;
        }
        state.best_price
    }

    /// Breakeven-plus-fee stop once net profit clears the threshold
    fn breakeven_price(&self, position: &Position) -> Option<Decimal> {
        let net = self.net_profit(position);
        let threshold = self.params.breakeven_threshold * position.notional();
        if net <= Decimal::ZERO || net <= threshold {
            return None;
        }
        let entry = position.entry_price;
        let fee_per_unit = Decimal::TWO * entry * self.params.taker_fee_rate;
        let offset = fee_per_unit + entry * self.params.breakeven_buffer;
        Some(entry - position.side.protective_sign() * offset)
    }

    /// Breakeven moved by every whole profit step earned
    fn profit_step_price(&self, position: &Position, breakeven: Decimal) -> Option<Decimal> {
        let step_value = position.notional() * self.params.profit_step;
        if step_value <= Decimal::ZERO {
            return None;
        }
        let steps = (self.net_profit(position) / step_value).floor();
        if steps < Decimal::ONE {
            return None;
        }
        let locked_per_unit = steps * step_value / position.quantity;
        Some(breakeven - position.side.protective_sign() * locked_per_unit)
    }

    fn round(&self, price: Decimal) -> Decimal {
        match self.params.price_precision {
            Some(dp) => price.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
            None => price,
        }
    }

    fn is_valid(&self, side: Side, stop: Decimal, price: Decimal) -> bool {
        let distance = match side {
            Side::Long => price - stop,
            Side::Short => stop - price,
        };
        distance > Decimal::ZERO && distance >= price * self.params.min_stop_distance
    }
}

/// Whether a proposed stop is worth sending to the exchange
///
/// Always true with nothing placed. Otherwise the move must exceed
/// `min_move` and, unless `allow_loosening`, must tighten the stop.
pub fn needs_adjustment(
    placed: Option<Decimal>,
    proposed: Decimal,
    side: Side,
    min_move: Decimal,
    allow_loosening: bool,
) -> bool {
    let Some(placed) = placed else {
        return true;
    };
    if (proposed - placed).abs() <= min_move {
        return false;
    }
    allow_loosening || side.is_tighter(proposed, placed)
}
