//! Monitoring loop
//!
//! One coordinating loop visits every due symbol in turn:
//!
//! ```text
//! positions (cached) -> price (cached) -> ATR (cached) -> engine -> gate -> place stop
//! ```
//!
//! Symbol scheduling follows a small state machine:
//!
//! ```text
//! NORMAL <-> AGGRESSIVE       pnl ratio crosses aggressive_profit_threshold
//! any    --> ERROR_BACKOFF    error_backoff_threshold exhausted failures
//! ERROR_BACKOFF --> NORMAL/AGGRESSIVE   next successful cycle
//! any    --> EXCLUDED         fatal upstream error, until restart
//! ```

use super::{
    classify, poll_interval, CacheValue, MonitorError, MonitorMode, SymbolOutcome, SymbolReport,
    SymbolState, TickReport,
};
use crate::cache::BoundedCache;
use crate::config::Config;
use crate::exchange::{Exchange, Position};
use crate::notify::{Alert, LogNotifier, Notifier, NotifyError};
use crate::ratelimit::{CallError, RateLimiter, RetryPolicy};
use crate::strategy::{needs_adjustment, Decision, HoldReason, MarketState, StopStrategyEngine};
use crate::telemetry::{
    increment, record_latency, set_gauge, CounterMetric, GaugeMetric, LatencyMetric,
};
use crate::volatility::{self, VolatilityError, VolatilityEstimate};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};

const POSITIONS_KEY: &str = "positions";

fn price_key(symbol: &str) -> String {
    format!("price:{symbol}")
}

fn atr_key(symbol: &str) -> String {
    format!("atr:{symbol}")
}

/// Keeps a protective stop attached to every open position
pub struct MonitoringLoop<E: Exchange> {
    exchange: Arc<E>,
    cache: Arc<BoundedCache<CacheValue>>,
    limiter: Arc<RateLimiter>,
    engine: StopStrategyEngine,
    retry: RetryPolicy,
    config: Config,
    notifier: Arc<dyn Notifier>,
    symbols: HashMap<String, SymbolState>,
    next_health_check: Instant,
}

impl<E: Exchange> MonitoringLoop<E> {
    /// Create a loop with its own cache and limiter
    pub fn new(exchange: Arc<E>, config: Config) -> Self {
        let cache = Arc::new(BoundedCache::new(config.cache.sweep_horizon()));
        let limiter = Arc::new(config.api.rate_limiter());
        Self::with_shared(exchange, cache, limiter, config)
    }

    /// Create a loop sharing a cache and limiter with other tasks
    pub fn with_shared(
        exchange: Arc<E>,
        cache: Arc<BoundedCache<CacheValue>>,
        limiter: Arc<RateLimiter>,
        config: Config,
    ) -> Self {
        let engine = StopStrategyEngine::new(config.stop_loss.clone(), config.strategies.clone());
        let retry = config.api.retry_policy();
        Self {
            exchange,
            cache,
            limiter,
            engine,
            retry,
            config,
            notifier: Arc::new(LogNotifier),
            symbols: HashMap::new(),
            // First tick runs the health check
            next_health_check: Instant::now(),
        }
    }

    /// Send alerts to `notifier` instead of the log
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run until `shutdown` flips to true or a fatal error occurs
    ///
    /// A tick in flight when shutdown arrives gets the configured grace
    /// period to finish, then is dropped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
        let grace = self.config.monitoring.shutdown_grace();
        tracing::info!(
            normal_secs = self.config.monitoring.normal_interval_secs,
            aggressive_secs = self.config.monitoring.aggressive_interval_secs,
            "Monitoring loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = {
                let tick = self.run_tick();
                tokio::pin!(tick);

                tokio::select! {
                    result = &mut tick => result,
                    _ = shutdown.changed() => {
                        tracing::info!(grace_secs = grace.as_secs(), "Shutdown requested, finishing tick");
                        match timeout(grace, &mut tick).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::warn!(error = %e, "Final tick failed"),
                            Err(_) => tracing::warn!("Grace period elapsed, abandoning tick"),
                        }
                        break;
                    }
                }
            };

            let wake = match result {
                Ok(_) => self.next_wake(),
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Monitoring loop stopped");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Tick failed, retrying later");
                    Instant::now() + self.config.monitoring.retry_interval()
                }
            };

            tokio::select! {
                _ = sleep_until(wake) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Monitoring loop stopped");
        Ok(())
    }

    /// Run one monitoring cycle over every due symbol
    pub async fn run_tick(&mut self) -> Result<TickReport, MonitorError> {
        let started = Instant::now();
        let mut report = TickReport::default();

        if started >= self.next_health_check {
            self.health_check().await;
            self.next_health_check = started + self.config.monitoring.health_check_interval();
            report.health_checked = true;
        }

        let positions = self.positions().await.map_err(MonitorError::Positions)?;
        let open: Vec<Position> = positions.into_iter().filter(Position::is_open).collect();
        report.open_positions = open.len();
        self.drop_closed(&open);

        for position in &open {
            let now = Instant::now();
            let mut state = *self
                .symbols
                .entry(position.symbol.clone())
                .or_insert_with(|| SymbolState::new(now));
            if !state.is_due(now) {
                continue;
            }

            let outcome = match self.process_symbol(position, &state).await {
                Ok((outcome, pnl_ratio)) => {
                    state.consecutive_errors = 0;
                    if let SymbolOutcome::Adjusted { stop, .. } = outcome {
                        state.last_stop = Some(stop);
                    }
                    state.mode = classify(pnl_ratio, 0, &self.config.monitoring);
                    outcome
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(
                        symbol = %position.symbol,
                        error = %err,
                        "Fatal upstream error, excluding symbol"
                    );
                    increment(CounterMetric::SymbolsExcluded);
                    state.mode = MonitorMode::Excluded;
                    self.alert(Alert::SymbolExcluded {
                        symbol: position.symbol.clone(),
                        error: err.to_string(),
                    })
                    .await;
                    SymbolOutcome::Failed {
                        error: err.to_string(),
                    }
                }
                Err(err) => {
                    state.consecutive_errors += 1;
                    state.mode = classify(
                        position.pnl_ratio(),
                        state.consecutive_errors,
                        &self.config.monitoring,
                    );
                    tracing::warn!(
                        symbol = %position.symbol,
                        error = %err,
                        consecutive_errors = state.consecutive_errors,
                        mode = %state.mode,
                        "Symbol cycle failed"
                    );
                    SymbolOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };

            state.next_due = Instant::now() + poll_interval(state.mode, &self.config.monitoring);
            self.symbols.insert(position.symbol.clone(), state);
            report.symbols.push(SymbolReport {
                symbol: position.symbol.clone(),
                mode: state.mode,
                outcome,
            });
        }

        set_gauge(GaugeMetric::MonitoredSymbols, self.symbols.len() as f64);
        record_latency(LatencyMetric::Tick, started.elapsed());
        Ok(report)
    }

    /// Earliest instant anything is due, bounded by the normal interval
    pub fn next_wake(&self) -> Instant {
        let ceiling = Instant::now() + self.config.monitoring.normal_interval();
        self.symbols
            .values()
            .filter(|s| s.mode != MonitorMode::Excluded)
            .map(|s| s.next_due)
            .chain(std::iter::once(self.next_health_check))
            .fold(ceiling, Instant::min)
    }

    /// Scheduling state for a symbol
    pub fn symbol_state(&self, symbol: &str) -> Option<&SymbolState> {
        self.symbols.get(symbol)
    }

    /// Strategy engine
    pub fn engine(&self) -> &StopStrategyEngine {
        &self.engine
    }

    /// One cycle for a symbol; also returns the pnl ratio at the fetched price
    async fn process_symbol(
        &mut self,
        position: &Position,
        state: &SymbolState,
    ) -> Result<(SymbolOutcome, Decimal), CallError> {
        let symbol = position.symbol.as_str();
        let price = self.current_price(symbol).await?;
        let volatility = self.volatility(symbol).await?;
        let market = MarketState::now(price);

        // The cached position may be older than the price
        let mut position = position.clone();
        position.mark(price);
        let pnl_ratio = position.pnl_ratio();

        let decision = match self.engine.decide(&position, &market, volatility.as_ref()) {
            Some(Decision::Stop(decision)) => decision,
            Some(Decision::Hold(reason)) => {
                increment(CounterMetric::Holds);
                tracing::debug!(%symbol, %price, %reason, "Holding current stop");
                return Ok((SymbolOutcome::Held { reason }, pnl_ratio));
            }
            None => {
                let outcome = SymbolOutcome::Held {
                    reason: HoldReason::NoCandidates,
                };
                return Ok((outcome, pnl_ratio));
            }
        };

        tracing::debug!(
            %symbol,
            %price,
            stop = %decision.stop_price,
            strategy = %decision.strategy,
            sequence = decision.sequence,
            candidates = ?decision.candidates,
            "Stop decision"
        );

        let placed = position.stop_price.or(state.last_stop);
        let min_move = price * self.config.monitoring.min_move_threshold;
        if !needs_adjustment(
            placed,
            decision.stop_price,
            decision.side,
            min_move,
            self.config.monitoring.allow_loosening,
        ) {
            let outcome = SymbolOutcome::Unchanged {
                proposed: decision.stop_price,
            };
            return Ok((outcome, pnl_ratio));
        }

        let exchange = &*self.exchange;
        let stop = decision.stop_price;
        let side = decision.side;
        let started = Instant::now();
        let placed_result = self
            .limiter
            .call_with_retry("place_stop", &self.retry, move || {
                exchange.place_or_modify_stop(symbol, stop, side)
            })
            .await;
        record_latency(LatencyMetric::StopPlacement, started.elapsed());

        match placed_result {
            Ok(order_id) => {
                self.cache.invalidate(POSITIONS_KEY);
                increment(CounterMetric::StopAdjustments);
                tracing::info!(
                    %symbol,
                    %side,
                    previous = ?placed,
                    %stop,
                    strategy = %decision.strategy,
                    %order_id,
                    "Stop adjusted"
                );
                self.alert(Alert::StopAdjusted {
                    symbol: symbol.to_string(),
                    previous: placed,
                    stop,
                    strategy: decision.strategy,
                })
                .await;
                Ok((SymbolOutcome::Adjusted { stop, order_id }, pnl_ratio))
            }
            Err(CallError::Rejected(err)) => {
                tracing::warn!(%symbol, %stop, error = %err, "Stop rejected by exchange");
                let outcome = SymbolOutcome::Rejected {
                    reason: err.to_string(),
                };
                Ok((outcome, pnl_ratio))
            }
            Err(err) => Err(err),
        }
    }

    /// Deliver an alert within the upstream call timeout; failures are only logged
    async fn alert(&self, alert: Alert) {
        let delivered = timeout(self.retry.call_timeout, self.notifier.notify(&alert))
            .await
            .unwrap_or(Err(NotifyError::Timeout));
        if let Err(e) = delivered {
            increment(CounterMetric::AlertFailures);
            tracing::warn!(symbol = alert.symbol(), error = %e, "Alert not delivered");
        }
    }

    async fn positions(&self) -> Result<Vec<Position>, CallError> {
        let ttl = self.config.cache.position_ttl();
        if let Some(CacheValue::Positions(positions)) = self.cache.get(POSITIONS_KEY, ttl) {
            return Ok(positions);
        }

        let exchange = &*self.exchange;
        let positions = self
            .limiter
            .call_with_retry("positions", &self.retry, move || exchange.fetch_positions())
            .await?;
        self.cache
            .set(POSITIONS_KEY, CacheValue::Positions(positions.clone()));
        Ok(positions)
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal, CallError> {
        let key = price_key(symbol);
        if let Some(CacheValue::Price(price)) = self.cache.get(&key, self.config.cache.price_ttl()) {
            return Ok(price);
        }

        let exchange = &*self.exchange;
        let price = self
            .limiter
            .call_with_retry("price", &self.retry, move || {
                exchange.fetch_current_price(symbol)
            })
            .await?;
        self.cache.set(key, CacheValue::Price(price));
        Ok(price)
    }

    /// Cached ATR, or `None` while history is too short
    async fn volatility(&self, symbol: &str) -> Result<Option<VolatilityEstimate>, CallError> {
        let key = atr_key(symbol);
        if let Some(CacheValue::Volatility(estimate)) =
            self.cache.get(&key, self.config.cache.atr_ttl())
        {
            return Ok(Some(estimate));
        }

        let params = &self.config.stop_loss;
        let timeframe = params.atr_timeframe.as_str();
        let count = params.atr_period + 1;
        let exchange = &*self.exchange;
        let bars = self
            .limiter
            .call_with_retry("price_bars", &self.retry, move || {
                exchange.fetch_price_bars(symbol, timeframe, count)
            })
            .await?;

        match volatility::estimate(symbol, &bars, params.atr_period) {
            Ok(estimate) => {
                self.cache.set(key, CacheValue::Volatility(estimate.clone()));
                Ok(Some(estimate))
            }
            Err(VolatilityError::InsufficientData { have, need }) => {
                tracing::debug!(%symbol, have, need, "Not enough bars for ATR");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(%symbol, error = %e, "ATR unavailable");
                Ok(None)
            }
        }
    }

    /// Forget symbols whose positions closed; exclusions stick until restart
    fn drop_closed(&mut self, open: &[Position]) {
        let open: HashSet<&str> = open.iter().map(|p| p.symbol.as_str()).collect();
        let closed: Vec<String> = self
            .symbols
            .iter()
            .filter(|(s, state)| !open.contains(s.as_str()) && state.mode != MonitorMode::Excluded)
            .map(|(s, _)| s.clone())
            .collect();

        for symbol in closed {
            tracing::info!(%symbol, "Position closed, dropping state");
            self.symbols.remove(&symbol);
            self.engine.forget(&symbol);
            self.cache.invalidate(&price_key(&symbol));
            self.cache.invalidate(&atr_key(&symbol));
        }
    }

    /// Ping upstream, sweep the cache and publish stats
    async fn health_check(&self) {
        let exchange = &*self.exchange;
        let ping = self
            .limiter
            .call_with_retry("ping", &self.retry, move || exchange.ping())
            .await;
        if let Err(e) = &ping {
            increment(CounterMetric::HealthCheckFailures);
            tracing::warn!(error = %e, "Health check ping failed");
        }

        let removed = self.cache.sweep();
        let stats = self.cache.stats();
        set_gauge(GaugeMetric::CacheEntries, stats.entries as f64);
        set_gauge(GaugeMetric::CacheBytes, stats.approx_bytes as f64);

        tracing::info!(
            upstream_ok = ping.is_ok(),
            cache_entries = stats.entries,
            cache_bytes = stats.approx_bytes,
            swept = removed,
            symbols = self.symbols.len(),
            "Health check"
        );
    }
}
