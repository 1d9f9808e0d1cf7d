//! Monitoring module
//!
//! Schedules per-symbol stop maintenance against the exchange

mod scheduler;
mod types;

pub use scheduler::MonitoringLoop;
pub use types::{
    classify, poll_interval, CacheValue, MonitorError, MonitorMode, SymbolOutcome, SymbolReport,
    SymbolState, TickReport,
};
