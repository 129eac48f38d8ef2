//! Cache Statistics Module
//!
//! Tracks hits, misses, and the entries removed by each kind of sweep.

use serde::Serialize;

// == Cache Stats ==
/// Cache performance counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of `get` calls that found a live entry
    pub hits: u64,
    /// Number of `get` calls that found nothing (absent or expired)
    pub misses: u64,
    /// Entries removed by the capacity or size policy
    pub evictions: u64,
    /// Entries removed because their deadline passed
    pub expirations: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub(crate) fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub(crate) fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
