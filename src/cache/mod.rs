//! Bounded cache module
//!
//! Time-expiring key-value store that shields the exchange from redundant reads

mod bounded;
mod types;

pub use bounded::{BoundedCache, DEFAULT_SWEEP_HORIZON};
pub use types::{ApproxSize, CacheStats};
