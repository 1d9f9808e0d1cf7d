//! Exponential backoff state machine
//!
//! Decides what happens after a failed attempt without sleeping itself, so it
//! works the same under blocking or async callers.

use super::RetryPolicy;
use crate::exchange::ExchangeError;
use std::time::Duration;

/// Next step after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Wait this long, then try again
    Retry(Duration),
    /// Transient failure but no retries left
    Exhausted,
    /// Failure is not transient; give up now
    Abort,
}

/// Attempt counter for one logical upstream call
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// Start tracking a new call
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failure and decide what to do next
    pub fn on_failure(&mut self, error: &ExchangeError) -> RetryStep {
        if !error.is_transient() {
            return RetryStep::Abort;
        }
        if self.attempt >= self.policy.max_retries {
            return RetryStep::Exhausted;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        RetryStep::Retry(delay)
    }

    /// Attempts made so far, counting the initial one
    pub fn attempts(&self) -> u32 {
        self.attempt + 1
    }

    /// Backoff before retry number `attempt` (0-based): base * 2^attempt, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.policy
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay)
    }
}
