//! Fixed-window rate limiter with retrying call wrapper

use super::{CallError, RetryPolicy, RetryState, RetryStep};
use crate::exchange::ExchangeError;
use crate::telemetry::{increment, CounterMetric};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

/// Call budget for the current window
#[derive(Debug, Clone)]
pub struct RateBudget {
    window_start: Instant,
    calls: u32,
    window: Duration,
    max_calls: u32,
}

impl RateBudget {
    /// Create a budget of `max_calls` per `window`
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            calls: 0,
            window,
            max_calls: max_calls.max(1),
        }
    }

    /// Take a permit at `now`, or return how long until the window resets
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.calls = 0;
        }
        if self.calls < self.max_calls {
            self.calls += 1;
            return Ok(());
        }
        Err((self.window_start + self.window).saturating_duration_since(now))
    }

    /// Calls made in the current window
    pub fn calls(&self) -> u32 {
        self.calls
    }
}

/// Caps outbound calls to the exchange
///
/// Waiters queue on a fair mutex, so permits are handed out in arrival order
/// and a waiter never sleeps longer than one window.
pub struct RateLimiter {
    budget: Mutex<RateBudget>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_calls` per `window`
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            budget: Mutex::new(RateBudget::new(max_calls, window)),
        }
    }

    /// Create a limiter allowing `calls` per second
    pub fn per_second(calls: u32) -> Self {
        Self::new(calls, Duration::from_secs(1))
    }

    /// Wait for a permit
    pub async fn acquire(&self) {
        let mut budget = self.budget.lock().await;
        loop {
            match budget.try_take(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limit reached");
                    sleep(wait).await;
                }
            }
        }
    }

    /// Run one upstream call with rate limiting and exponential backoff
    ///
    /// Every attempt, retries included, takes its own permit and runs under
    /// `policy.call_timeout`. An attempt that times out is treated as a network
    /// failure. Transient errors are retried per `policy`; anything else is
    /// returned immediately.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        label: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let mut state = RetryState::new(policy.clone());
        loop {
            self.acquire().await;
            let err = match timeout(policy.call_timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => {
                    tracing::debug!(
                        call = label,
                        timeout_ms = policy.call_timeout.as_millis() as u64,
                        "Upstream call timed out"
                    );
                    ExchangeError::Network("timeout".to_string())
                }
            };

            match state.on_failure(&err) {
                RetryStep::Retry(delay) => {
                    tracing::warn!(
                        call = label,
                        error = %err,
                        attempt = state.attempts() - 1,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream call failed, retrying"
                    );
                    increment(CounterMetric::UpstreamRetries);
                    sleep(delay).await;
                }
                RetryStep::Exhausted => {
                    tracing::error!(
                        call = label,
                        error = %err,
                        attempts = state.attempts(),
                        "Upstream call failed, retries exhausted"
                    );
                    increment(CounterMetric::UpstreamFailures);
                    return Err(CallError::Exhausted {
                        attempts: state.attempts(),
                        source: err,
                    });
                }
                RetryStep::Abort => {
                    increment(CounterMetric::UpstreamFailures);
                    return Err(match err {
                        ExchangeError::Fatal(_) => CallError::Fatal(err),
                        _ => CallError::Rejected(err),
                    });
                }
            }
        }
    }
}
