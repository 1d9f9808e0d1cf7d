//! Exchange boundary
//!
//! The upstream service that owns positions, market data and stop orders.
//! Only reached through the rate limiter's retry wrapper.

mod paper;
mod types;

pub use paper::{ExchangeOp, PaperExchange, PaperFixture, PlacedStop};
pub use types::{timeframe_secs, ExchangeError, OrderId, Position, PriceBar, Side};

use async_trait::async_trait;
use rust_decimal::Decimal;

/// Trait for exchange connectivity implementations
#[async_trait]
pub trait Exchange: Send + Sync {
    /// All positions with non-zero size
    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError>;
    /// Most recent `count` closed bars, oldest first
    async fn fetch_price_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<PriceBar>, ExchangeError>;
    /// Last traded price
    async fn fetch_current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;
    /// Replace the protective stop for a position
    async fn place_or_modify_stop(
        &self,
        symbol: &str,
        price: Decimal,
        side: Side,
    ) -> Result<OrderId, ExchangeError>;
    /// Connectivity check used by the health check
    async fn ping(&self) -> Result<(), ExchangeError>;
}
