//! Volatility estimation module
//!
//! Average true range from historical price bars

mod atr;
mod types;

pub use atr::{estimate, true_range};
pub use types::{VolatilityError, VolatilityEstimate};
