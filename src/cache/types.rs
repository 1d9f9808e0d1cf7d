//! Cache types

use rust_decimal::Decimal;
use serde::Serialize;

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of stored entries, expired or not
    pub entries: usize,
    /// Rough memory footprint of keys and values in bytes
    pub approx_bytes: usize,
}

/// Rough size estimate used for cache statistics
pub trait ApproxSize {
    /// Approximate heap plus inline size in bytes
    fn approx_size(&self) -> usize;
}

impl ApproxSize for Decimal {
    fn approx_size(&self) -> usize {
        std::mem::size_of::<Decimal>()
    }
}

impl ApproxSize for String {
    fn approx_size(&self) -> usize {
        std::mem::size_of::<String>() + self.len()
    }
}

impl<T: ApproxSize> ApproxSize for Vec<T> {
    fn approx_size(&self) -> usize {
        std::mem::size_of::<Vec<T>>() + self.iter().map(ApproxSize::approx_size).sum::<usize>()
    }
}
