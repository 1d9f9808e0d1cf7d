//! Key-value store with reader-supplied expiry

use super::{ApproxSize, CacheStats};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Default horizon after which `sweep` drops an entry regardless of reader ttl
pub const DEFAULT_SWEEP_HORIZON: Duration = Duration::from_secs(300);

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Shared cache guarding upstream reads
///
/// Entries carry no ttl of their own. Each `get` decides freshness with the
/// ttl the caller passes, so one key space should always be read with the
/// same ttl. `sweep` bounds memory with a fixed horizon; an entry dropped by
/// a sweep just turns into a miss and a refetch.
pub struct BoundedCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    sweep_horizon: Duration,
}

impl<V: Clone + ApproxSize> BoundedCache<V> {
    /// Create a cache with the given sweep horizon
    pub fn new(sweep_horizon: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            sweep_horizon,
        }
    }

    /// Value for `key` if it was stored less than `ttl` ago
    ///
    /// Expired entries are removed on the way out.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<V> {
        let mut entries = self.lock();
        let now = Instant::now();

        let expired = match entries.get(key) {
            Some(entry) if now.duration_since(entry.stored_at) < ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            tracing::trace!(key, "Cache entry expired");
        }
        None
    }

    /// Store a value, replacing any previous entry
    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut entries = self.lock();
        entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop a single key; returns whether it was present
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop every entry older than the sweep horizon; returns how many went
    pub fn sweep(&self) -> usize {
        let mut entries = self.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.sweep_horizon);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "Cache sweep");
        }
        removed
    }

    /// Entry count and approximate size
    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        let approx_bytes = entries
            .iter()
            .map(|(key, entry)| key.len() + entry.value.approx_size())
            .sum();
        CacheStats {
            entries: entries.len(),
            approx_bytes,
        }
    }

    // Operations never panic while holding the lock, so a poisoned guard is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone + ApproxSize> Default for BoundedCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_HORIZON)
    }
}
