//! Paper exchange with in-memory positions and simulated stop placement

use super::{Exchange, ExchangeError, OrderId, Position, PriceBar, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Exchange operations, used to inject failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeOp {
    Positions,
    PriceBars,
    CurrentPrice,
    PlaceStop,
    Ping,
}

/// A stop accepted by the paper exchange
#[derive(Debug, Clone)]
pub struct PlacedStop {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Initial market state for a paper session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaperFixture {
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,
    #[serde(default)]
    pub bars: HashMap<String, Vec<PriceBar>>,
}

impl PaperFixture {
    /// Load a fixture from a JSON file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let fixture: PaperFixture = serde_json::from_str(&content)?;
        Ok(fixture)
    }
}

#[derive(Default)]
struct PaperState {
    positions: BTreeMap<String, Position>,
    prices: HashMap<String, Decimal>,
    bars: HashMap<String, Vec<PriceBar>>,
    stops: Vec<PlacedStop>,
    failures: HashMap<ExchangeOp, VecDeque<ExchangeError>>,
    calls: HashMap<ExchangeOp, usize>,
}

impl PaperState {
    /// Count the call and pop an injected failure, if any
    fn enter(&mut self, op: ExchangeOp) -> Result<(), ExchangeError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get_mut(&op).and_then(|queue| queue.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Paper exchange backed by in-memory state
#[derive(Clone, Default)]
pub struct PaperExchange {
    state: Arc<RwLock<PaperState>>,
}

impl PaperExchange {
    /// Create an empty paper exchange
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a paper exchange seeded from a fixture
    pub fn from_fixture(fixture: PaperFixture) -> Self {
        let mut state = PaperState {
            prices: fixture.prices,
            bars: fixture.bars,
            ..Default::default()
        };
        for position in fixture.positions {
            state.positions.insert(position.symbol.clone(), position);
        }
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Open or replace a position
    pub async fn open_position(&self, position: Position) {
        let mut state = self.state.write().await;
        state.positions.insert(position.symbol.clone(), position);
    }

    /// Close a position and drop its stop
    pub async fn close_position(&self, symbol: &str) -> Option<Position> {
        let mut state = self.state.write().await;
        state.positions.remove(symbol)
    }

    /// Move the market; open positions on the symbol are marked to the new price
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.write().await;
        state.prices.insert(symbol.to_string(), price);
        if let Some(position) = state.positions.get_mut(symbol) {
            position.mark(price);
        }
    }

    /// Replace the bar history for a symbol
    pub async fn set_bars(&self, symbol: &str, bars: Vec<PriceBar>) {
        let mut state = self.state.write().await;
        state.bars.insert(symbol.to_string(), bars);
    }

    /// Make the next `times` calls of `op` fail with `error`
    pub async fn fail_next(&self, op: ExchangeOp, error: ExchangeError, times: usize) {
        let mut state = self.state.write().await;
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Number of calls made for an operation
    pub async fn calls(&self, op: ExchangeOp) -> usize {
        let state = self.state.read().await;
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// All stops accepted so far
    pub async fn placed_stops(&self) -> Vec<PlacedStop> {
        let state = self.state.read().await;
        state.stops.clone()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let mut state = self.state.write().await;
        state.enter(ExchangeOp::Positions)?;
        Ok(state
            .positions
            .values()
            .filter(|p| !p.quantity.is_zero())
            .cloned()
            .collect())
    }

    async fn fetch_price_bars(
        &self,
        symbol: &str,
        _timeframe: &str,
        count: usize,
    ) -> Result<Vec<PriceBar>, ExchangeError> {
        let mut state = self.state.write().await;
        state.enter(ExchangeOp::PriceBars)?;
        let bars = state.bars.get(symbol).cloned().unwrap_or_default();
        let skip = bars.len().saturating_sub(count);
        Ok(bars.into_iter().skip(skip).collect())
    }

    async fn fetch_current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let mut state = self.state.write().await;
        state.enter(ExchangeOp::CurrentPrice)?;
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::Fatal(format!("unknown symbol {symbol}")))
    }

    async fn place_or_modify_stop(
        &self,
        symbol: &str,
        price: Decimal,
        side: Side,
    ) -> Result<OrderId, ExchangeError> {
        let mut state = self.state.write().await;
        state.enter(ExchangeOp::PlaceStop)?;

        let mark = state.prices.get(symbol).copied();
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| ExchangeError::Fatal(format!("no open position for {symbol}")))?;

        if position.side != side {
            return Err(ExchangeError::InvalidRequest(format!(
                "side mismatch: position is {}",
                position.side
            )));
        }

        // Stop would trigger immediately
        if let Some(mark) = mark {
            let immediate = match side {
                Side::Long => price >= mark,
                Side::Short => price <= mark,
            };
            if immediate {
                return Err(ExchangeError::InvalidRequest(format!(
                    "stop {price} would trigger immediately at {mark}"
                )));
            }
        }

        position.stop_price = Some(price);

        let order_id = OrderId::new_v4();
        state.stops.push(PlacedStop {
            order_id,
            symbol: symbol.to_string(),
            side,
            price,
            timestamp: Utc::now(),
        });

        tracing::info!(%symbol, %price, %side, ?order_id, "Paper stop placed");
        Ok(order_id)
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        let mut state = self.state.write().await;
        state.enter(ExchangeOp::Ping)
    }
}
