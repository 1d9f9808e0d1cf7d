//! Rate limiting types

use crate::exchange::ExchangeError;
use std::time::Duration;
use thiserror::Error;

/// Terminal outcome of a rate-limited, retried upstream call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Transient failures kept happening until retries ran out
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        source: ExchangeError,
    },
    /// Upstream rejected the request itself; retrying would not help
    #[error("Request rejected: {0}")]
    Rejected(ExchangeError),
    /// Permanent upstream failure (auth, unknown symbol)
    #[error("Fatal upstream failure: {0}")]
    Fatal(ExchangeError),
}

impl CallError {
    /// Whether the failure is permanent for the affected symbol
    pub fn is_fatal(&self) -> bool {
        matches!(self, CallError::Fatal(_))
    }

    /// Underlying exchange error
    pub fn exchange_error(&self) -> &ExchangeError {
        match self {
            CallError::Exhausted { source, .. } => source,
            CallError::Rejected(err) | CallError::Fatal(err) => err,
        }
    }
}

/// Retry configuration for upstream calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles every retry
    pub base_delay: Duration,
    /// Ceiling on any single backoff delay
    pub max_delay: Duration,
    /// Time limit for a single attempt; an attempt that runs over counts as a network failure
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default backoff ceiling
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// Set the backoff ceiling
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    /// Set the per-attempt time limit
    pub fn call_timeout(mut self, d: Duration) -> Self {
        self.call_timeout = d;
        self
    }
}
