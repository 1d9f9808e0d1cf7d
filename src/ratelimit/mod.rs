//! Rate limiting module
//!
//! Outbound call budget and retry/backoff for exchange requests

mod limiter;
mod retry;
mod types;

pub use limiter::{RateBudget, RateLimiter};
pub use retry::{RetryState, RetryStep};
pub use types::{CallError, RetryPolicy};
