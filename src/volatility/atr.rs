//! Average true range over closed bars

use super::{VolatilityError, VolatilityEstimate};
use crate::exchange::PriceBar;
use chrono::Utc;
use rust_decimal::Decimal;

/// True range of `bar` given the previous close
pub fn true_range(bar: &PriceBar, prev_close: Decimal) -> Decimal {
    let range = bar.high - bar.low;
    let up = (bar.high - prev_close).abs();
    let down = (bar.low - prev_close).abs();
    range.max(up).max(down)
}

/// Simple average of the last `period` true ranges
///
/// The first bar only seeds the previous close, so `period + 1` bars are
/// needed. Bars must be ordered oldest first.
pub fn estimate(
    symbol: &str,
    bars: &[PriceBar],
    period: usize,
) -> Result<VolatilityEstimate, VolatilityError> {
    if period == 0 {
        return Err(VolatilityError::InvalidPeriod(period));
    }
    let need = period + 1;
    if bars.len() < need {
        return Err(VolatilityError::InsufficientData {
            have: bars.len(),
            need,
        });
    }

    let window = &bars[bars.len() - need..];
    let sum: Decimal = window
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .sum();

    Ok(VolatilityEstimate {
        symbol: symbol.to_string(),
        period,
        value: sum / Decimal::from(period),
        computed_at: Utc::now(),
    })
}
