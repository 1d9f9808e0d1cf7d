//! Monitoring loop integration tests against the paper exchange

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stop_guard::config::Config;
use stop_guard::exchange::{
    Exchange, ExchangeError, ExchangeOp, OrderId, PaperExchange, Position, PriceBar, Side,
};
use stop_guard::monitor::{MonitorMode, MonitoringLoop, SymbolOutcome};
use stop_guard::notify::{Alert, Notifier, NotifyError};
use stop_guard::strategy::StrategyTag;
use tokio::sync::watch;
use tokio::time::{advance, Instant};

fn config() -> Config {
    let mut config = Config::default();
    config.api.calls_per_second = 100;
    config.api.base_retry_delay_ms = 100;
    config.stop_loss.atr_multiplier = dec!(1);
    config.stop_loss.risk_percentage = dec!(0.015);
    config
}

fn position(symbol: &str, side: Side, entry: Decimal) -> Position {
    Position {
        symbol: symbol.to_string(),
        side,
        entry_price: entry,
        quantity: dec!(1),
        unrealized_pnl: dec!(0),
        stop_price: None,
    }
}

/// Bars with a constant true range of `range` around `mid`
fn bars(count: usize, mid: Decimal, range: Decimal) -> Vec<PriceBar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| PriceBar {
            open: mid,
            high: mid + range / dec!(2),
            low: mid - range / dec!(2),
            close: mid,
            open_time: start + ChronoDuration::minutes(15 * i as i64),
            duration_secs: 900,
        })
        .collect()
}

async fn btc_exchange() -> Arc<PaperExchange> {
    let exchange = Arc::new(PaperExchange::new());
    exchange
        .open_position(position("BTCUSDT", Side::Long, dec!(20000)))
        .await;
    exchange.set_price("BTCUSDT", dec!(20000)).await;
    exchange
        .set_bars("BTCUSDT", bars(15, dec!(20000), dec!(100)))
        .await;
    exchange
}

/// Paper exchange whose price feed for one symbol never answers
struct StalledPriceExchange {
    inner: Arc<PaperExchange>,
    stalled: &'static str,
}

#[async_trait]
impl Exchange for StalledPriceExchange {
    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        self.inner.fetch_positions().await
    }

    async fn fetch_price_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<PriceBar>, ExchangeError> {
        self.inner.fetch_price_bars(symbol, timeframe, count).await
    }

    async fn fetch_current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        if symbol == self.stalled {
            std::future::pending::<()>().await;
        }
        self.inner.fetch_current_price(symbol).await
    }

    async fn place_or_modify_stop(
        &self,
        symbol: &str,
        price: Decimal,
        side: Side,
    ) -> Result<OrderId, ExchangeError> {
        self.inner.place_or_modify_stop(symbol, price, side).await
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        self.inner.ping().await
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct UnresponsiveNotifier;

#[async_trait]
impl Notifier for UnresponsiveNotifier {
    async fn notify(&self, _alert: &Alert) -> Result<(), NotifyError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_places_stop() {
    let exchange = btc_exchange().await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());

    let report = monitor.run_tick().await.unwrap();

    assert!(report.health_checked);
    assert_eq!(report.open_positions, 1);
    match report.outcome("BTCUSDT") {
        Some(SymbolOutcome::Adjusted { stop, .. }) => assert_eq!(*stop, dec!(19900)),
        other => panic!("expected adjustment, got {:?}", other),
    }

    let stops = exchange.placed_stops().await;
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].price, dec!(19900));
    assert_eq!(stops[0].side, Side::Long);

    let state = monitor.symbol_state("BTCUSDT").unwrap();
    assert_eq!(state.mode, MonitorMode::Normal);
    assert_eq!(state.last_stop, Some(dec!(19900)));
}

#[tokio::test(start_paused = true)]
async fn test_placement_invalidates_positions_cache() {
    let exchange = btc_exchange().await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());

    monitor.run_tick().await.unwrap();
    assert_eq!(exchange.calls(ExchangeOp::Positions).await, 1);

    // Nothing is due, but positions are refetched
    let report = monitor.run_tick().await.unwrap();
    assert!(report.symbols.is_empty());
    assert_eq!(exchange.calls(ExchangeOp::Positions).await, 2);

    // Without a placement the cached list is reused
    monitor.run_tick().await.unwrap();
    assert_eq!(exchange.calls(ExchangeOp::Positions).await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_small_move_does_not_churn() {
    let exchange = btc_exchange().await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());
    monitor.run_tick().await.unwrap();

    exchange.set_price("BTCUSDT", dec!(20010)).await;
    advance(Duration::from_secs(30)).await;
    let report = monitor.run_tick().await.unwrap();

    assert_eq!(
        report.outcome("BTCUSDT"),
        Some(&SymbolOutcome::Unchanged {
            proposed: dec!(19900)
        })
    );
    assert_eq!(exchange.placed_stops().await.len(), 1);
    // ATR came from cache
    assert_eq!(exchange.calls(ExchangeOp::PriceBars).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_profit_tightens_stop_and_polls_aggressively() {
    let exchange = btc_exchange().await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());
    monitor.run_tick().await.unwrap();

    exchange.set_price("BTCUSDT", dec!(21000)).await;
    advance(Duration::from_secs(30)).await;
    let report = monitor.run_tick().await.unwrap();

    match report.outcome("BTCUSDT") {
        // Trailing: 21000 * 0.99
        Some(SymbolOutcome::Adjusted { stop, .. }) => assert_eq!(*stop, dec!(20790)),
        other => panic!("expected adjustment, got {:?}", other),
    }
    let state = monitor.symbol_state("BTCUSDT").unwrap();
    assert_eq!(state.mode, MonitorMode::Aggressive);

    // Due again after the aggressive interval, not the normal one
    advance(Duration::from_secs(10)).await;
    let report = monitor.run_tick().await.unwrap();
    assert!(report.outcome("BTCUSDT").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_excludes_only_that_symbol() {
    let exchange = btc_exchange().await;
    // No price for ETHUSDT: the paper exchange treats it as an unknown symbol
    exchange
        .open_position(position("ETHUSDT", Side::Short, dec!(1800)))
        .await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());

    let report = monitor.run_tick().await.unwrap();
    assert!(matches!(
        report.outcome("ETHUSDT"),
        Some(SymbolOutcome::Failed { .. })
    ));
    assert!(matches!(
        report.outcome("BTCUSDT"),
        Some(SymbolOutcome::Adjusted { .. })
    ));
    assert_eq!(
        monitor.symbol_state("ETHUSDT").unwrap().mode,
        MonitorMode::Excluded
    );

    // Even with a price now available, the symbol stays excluded
    exchange.set_price("ETHUSDT", dec!(1800)).await;
    advance(Duration::from_secs(300)).await;
    let report = monitor.run_tick().await.unwrap();
    assert!(report.outcome("ETHUSDT").is_none());
    assert!(report.outcome("BTCUSDT").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_back_off() {
    let exchange = btc_exchange().await;
    // Initial attempt plus three retries
    exchange
        .fail_next(
            ExchangeOp::CurrentPrice,
            ExchangeError::Network("timeout".to_string()),
            4,
        )
        .await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());

    let start = Instant::now();
    let report = monitor.run_tick().await.unwrap();
    // Backoff sleeps: 100 + 200 + 400 ms
    assert_eq!(start.elapsed(), Duration::from_millis(700));
    assert!(matches!(
        report.outcome("BTCUSDT"),
        Some(SymbolOutcome::Failed { .. })
    ));
    assert_eq!(exchange.calls(ExchangeOp::CurrentPrice).await, 4);

    let state = *monitor.symbol_state("BTCUSDT").unwrap();
    assert_eq!(state.mode, MonitorMode::ErrorBackoff);
    assert_eq!(state.consecutive_errors, 1);

    // Not due at the normal interval
    advance(Duration::from_secs(30)).await;
    let report = monitor.run_tick().await.unwrap();
    assert!(report.outcome("BTCUSDT").is_none());

    // Due at the retry interval, and recovers
    advance(Duration::from_secs(31)).await;
    let report = monitor.run_tick().await.unwrap();
    assert!(matches!(
        report.outcome("BTCUSDT"),
        Some(SymbolOutcome::Adjusted { .. })
    ));
    let state = monitor.symbol_state("BTCUSDT").unwrap();
    assert_eq!(state.mode, MonitorMode::Normal);
    assert_eq!(state.consecutive_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_stop_is_not_an_error() {
    let exchange = btc_exchange().await;
    exchange
        .fail_next(
            ExchangeOp::PlaceStop,
            ExchangeError::InvalidRequest("price filter".to_string()),
            1,
        )
        .await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());

    let report = monitor.run_tick().await.unwrap();
    assert!(matches!(
        report.outcome("BTCUSDT"),
        Some(SymbolOutcome::Rejected { .. })
    ));
    let state = monitor.symbol_state("BTCUSDT").unwrap();
    assert_eq!(state.mode, MonitorMode::Normal);
    assert_eq!(state.consecutive_errors, 0);
    assert!(exchange.placed_stops().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_short_history_falls_back_to_other_strategies() {
    let exchange = btc_exchange().await;
    exchange
        .set_bars("BTCUSDT", bars(10, dec!(20000), dec!(100)))
        .await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());

    let report = monitor.run_tick().await.unwrap();
    match report.outcome("BTCUSDT") {
        // Trailing from entry: 20000 * 0.99
        Some(SymbolOutcome::Adjusted { stop, .. }) => assert_eq!(*stop, dec!(19800)),
        other => panic!("expected adjustment, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_closed_position_drops_state() {
    let exchange = btc_exchange().await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());
    monitor.run_tick().await.unwrap();
    assert_eq!(monitor.engine().best_price("BTCUSDT"), Some(dec!(20000)));

    exchange.close_position("BTCUSDT").await;
    advance(Duration::from_secs(30)).await;
    let report = monitor.run_tick().await.unwrap();

    assert_eq!(report.open_positions, 0);
    assert!(monitor.symbol_state("BTCUSDT").is_none());
    assert_eq!(monitor.engine().best_price("BTCUSDT"), None);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_cadence() {
    let exchange = btc_exchange().await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());

    assert!(monitor.run_tick().await.unwrap().health_checked);
    advance(Duration::from_secs(30)).await;
    assert!(!monitor.run_tick().await.unwrap().health_checked);
    assert_eq!(exchange.calls(ExchangeOp::Ping).await, 1);

    advance(Duration::from_secs(270)).await;
    assert!(monitor.run_tick().await.unwrap().health_checked);
    assert_eq!(exchange.calls(ExchangeOp::Ping).await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_ping_does_not_touch_trading_state() {
    let exchange = btc_exchange().await;
    exchange
        .fail_next(ExchangeOp::Ping, ExchangeError::Fatal("maintenance".to_string()), 1)
        .await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());

    let report = monitor.run_tick().await.unwrap();
    assert!(report.health_checked);
    assert!(matches!(
        report.outcome("BTCUSDT"),
        Some(SymbolOutcome::Adjusted { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_positions_error_stops_loop() {
    let exchange = btc_exchange().await;
    exchange
        .fail_next(
            ExchangeOp::Positions,
            ExchangeError::Fatal("invalid api key".to_string()),
            1,
        )
        .await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());
    let (_tx, rx) = watch::channel(false);

    let result = monitor.run(rx).await;
    let err = result.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown() {
    let exchange = btc_exchange().await;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config());
    let (tx, rx) = watch::channel(false);
    let start = Instant::now();

    let stop = async {
        tokio::time::sleep(Duration::from_secs(45)).await;
        tx.send(true).unwrap();
    };
    let (result, _) = tokio::join!(monitor.run(rx), stop);

    assert!(result.is_ok());
    assert_eq!(start.elapsed(), Duration::from_secs(45));
    // Ticks at 0s and 30s
    assert_eq!(exchange.calls(ExchangeOp::CurrentPrice).await, 2);
    assert_eq!(exchange.placed_stops().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_tick_after_grace() {
    let exchange = btc_exchange().await;
    exchange
        .fail_next(
            ExchangeOp::CurrentPrice,
            ExchangeError::Network("timeout".to_string()),
            1,
        )
        .await;
    let mut config = config();
    // One retry, 20s away: longer than the 10s grace period
    config.api.max_retries = 1;
    config.api.base_retry_delay_ms = 20_000;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config);
    let (tx, rx) = watch::channel(false);
    let start = Instant::now();

    let stop = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
    };
    let (result, _) = tokio::join!(monitor.run(rx), stop);

    assert!(result.is_ok());
    assert_eq!(start.elapsed(), Duration::from_secs(11));
    assert!(exchange.placed_stops().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_symbol_does_not_block_others() {
    let paper = btc_exchange().await;
    // Sorts ahead of BTCUSDT, so it is processed first
    paper
        .open_position(position("AAAUSDT", Side::Long, dec!(10)))
        .await;
    paper.set_price("AAAUSDT", dec!(10)).await;
    let exchange = Arc::new(StalledPriceExchange {
        inner: paper.clone(),
        stalled: "AAAUSDT",
    });
    let mut config = config();
    config.api.call_timeout_ms = 1_000;
    let mut monitor = MonitoringLoop::new(exchange, config);

    let start = Instant::now();
    let report = monitor.run_tick().await.unwrap();

    // Four timed-out attempts plus 100 + 200 + 400 ms of backoff
    assert_eq!(start.elapsed(), Duration::from_millis(4_700));
    assert!(matches!(
        report.outcome("AAAUSDT"),
        Some(SymbolOutcome::Failed { .. })
    ));
    assert_eq!(
        monitor.symbol_state("AAAUSDT").unwrap().mode,
        MonitorMode::ErrorBackoff
    );

    match report.outcome("BTCUSDT") {
        Some(SymbolOutcome::Adjusted { stop, .. }) => assert_eq!(*stop, dec!(19900)),
        other => panic!("expected adjustment, got {:?}", other),
    }
    let stops = paper.placed_stops().await;
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].symbol, "BTCUSDT");
}

#[tokio::test(start_paused = true)]
async fn test_mode_follows_fresh_price_over_cached_position() {
    let exchange = btc_exchange().await;
    let mut config = config();
    config.cache.position_ttl_secs = 120;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config);

    monitor.run_tick().await.unwrap();
    // Placement dropped the cached list; this tick caches it at zero pnl
    monitor.run_tick().await.unwrap();
    assert_eq!(exchange.calls(ExchangeOp::Positions).await, 2);

    // 1.5% up, past the aggressive threshold
    exchange.set_price("BTCUSDT", dec!(20300)).await;
    advance(Duration::from_secs(30)).await;
    let report = monitor.run_tick().await.unwrap();

    // Positions came from cache, still carrying the old pnl
    assert_eq!(exchange.calls(ExchangeOp::Positions).await, 2);
    assert!(report.outcome("BTCUSDT").is_some());
    assert_eq!(
        monitor.symbol_state("BTCUSDT").unwrap().mode,
        MonitorMode::Aggressive
    );
}

#[tokio::test(start_paused = true)]
async fn test_alerts_on_adjustment_and_exclusion() {
    let exchange = btc_exchange().await;
    exchange
        .open_position(position("ETHUSDT", Side::Short, dec!(1800)))
        .await;
    let notifier = Arc::new(RecordingNotifier::default());
    let mut monitor =
        MonitoringLoop::new(exchange.clone(), config()).with_notifier(notifier.clone());

    monitor.run_tick().await.unwrap();

    let alerts = notifier.alerts();
    assert_eq!(alerts.len(), 2);
    assert_eq!(
        alerts[0],
        Alert::StopAdjusted {
            symbol: "BTCUSDT".to_string(),
            previous: None,
            stop: dec!(19900),
            strategy: StrategyTag::Atr,
        }
    );
    assert!(matches!(
        &alerts[1],
        Alert::SymbolExcluded { symbol, .. } if symbol == "ETHUSDT"
    ));

    // Unchanged and held cycles stay quiet
    advance(Duration::from_secs(30)).await;
    monitor.run_tick().await.unwrap();
    assert_eq!(notifier.alerts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_notifier_does_not_stall_tick() {
    let exchange = btc_exchange().await;
    let mut config = config();
    config.api.call_timeout_ms = 1_000;
    let mut monitor = MonitoringLoop::new(exchange.clone(), config)
        .with_notifier(Arc::new(UnresponsiveNotifier));

    let start = Instant::now();
    let report = monitor.run_tick().await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert!(matches!(
        report.outcome("BTCUSDT"),
        Some(SymbolOutcome::Adjusted { .. })
    ));
    assert_eq!(exchange.placed_stops().await.len(), 1);
}
