//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Stop orders placed or moved
    StopAdjustments,
    /// Decisions that kept the current stop
    Holds,
    /// Upstream attempts that were retried
    UpstreamRetries,
    /// Upstream calls that failed for good
    UpstreamFailures,
    /// Symbols excluded after a fatal error
    SymbolsExcluded,
    /// Health checks whose ping failed
    HealthCheckFailures,
    /// Alerts that could not be delivered
    AlertFailures,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Entries held by the shared cache
    CacheEntries,
    /// Approximate cache footprint
    CacheBytes,
    /// Symbols currently tracked
    MonitoredSymbols,
}

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// One monitoring tick
    Tick,
    /// Stop placement round trip
    StopPlacement,
}

/// Bump a counter by one
pub fn increment(metric: CounterMetric) {
    let metric_name = match metric {
        CounterMetric::StopAdjustments => "stopguard_stop_adjustments_total",
        CounterMetric::Holds => "stopguard_holds_total",
        CounterMetric::UpstreamRetries => "stopguard_upstream_retries_total",
        CounterMetric::UpstreamFailures => "stopguard_upstream_failures_total",
        CounterMetric::SymbolsExcluded => "stopguard_symbols_excluded_total",
        CounterMetric::HealthCheckFailures => "stopguard_health_check_failures_total",
        CounterMetric::AlertFailures => "stopguard_alert_failures_total",
    };
    ::metrics::counter!(metric_name).increment(1);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let metric_name = match metric {
        GaugeMetric::CacheEntries => "stopguard_cache_entries",
        GaugeMetric::CacheBytes => "stopguard_cache_bytes",
        GaugeMetric::MonitoredSymbols => "stopguard_monitored_symbols",
    };
    ::metrics::gauge!(metric_name).set(value);
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let metric_name = match metric {
        LatencyMetric::Tick => "stopguard_tick_duration_seconds",
        LatencyMetric::StopPlacement => "stopguard_stop_placement_seconds",
    };
    ::metrics::histogram!(metric_name).record(duration.as_secs_f64());
}

/// Serve `/metrics` on all interfaces at `port`
pub fn install_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}
