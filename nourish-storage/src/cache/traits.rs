//! Response cache backend trait and statistics.

use async_trait::async_trait;
use nourish_core::{CacheEntry, NourishResult, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};

/// Storage for cache entries, keyed by fingerprint.
///
/// Implementations must be safe for concurrent use. Expiry policy lives in
/// [`ResponseCache`](super::ResponseCache); backends only store rows.
#[async_trait]
pub trait ResponseCacheBackend: Send + Sync {
    /// Read an entry, expired or not.
    async fn get(&self, key: &str) -> NourishResult<Option<CacheEntry>>;

    /// Insert or overwrite the entry stored under `entry.key`.
    async fn upsert(&self, entry: CacheEntry) -> NourishResult<()>;

    /// Atomically increment `hit_count`.
    ///
    /// Returns the new count, or `None` if the entry vanished in the meantime.
    async fn record_hit(&self, key: &str) -> NourishResult<Option<u64>>;

    /// Remove an entry. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> NourishResult<bool>;

    /// Keys of entries with `expires_at < now`.
    async fn expired_keys(&self, now: Timestamp) -> NourishResult<Vec<String>>;

    /// Delete the given keys in one unit of work, skipping any that are no
    /// longer expired at `now`. Returns the number removed.
    async fn delete_expired(&self, keys: &[String], now: Timestamp) -> NourishResult<u64>;

    /// Number of stored entries, including expired ones awaiting sweep.
    async fn entry_count(&self) -> NourishResult<u64>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    /// All misses, including expired ones and storage failures.
    pub misses: u64,
    pub expired_misses: u64,
    /// Storage errors and timeouts on any operation.
    pub errors: u64,
    pub entry_count: u64,
    pub tokens_saved: u64,
    pub cost_saved: f64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-process counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub expired_misses: AtomicU64,
    pub errors: AtomicU64,
    pub tokens_saved: AtomicU64,
    /// f64 bits.
    cost_saved: AtomicU64,
}

impl CacheCounters {
    pub fn add_cost_saved(&self, cost: f64) {
        // fetch_update only fails when the closure returns None.
        let _ = self
            .cost_saved
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + cost).to_bits())
            });
    }

    pub fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired_misses: self.expired_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            entry_count,
            tokens_saved: self.tokens_saved.load(Ordering::Relaxed),
            cost_saved: f64::from_bits(self.cost_saved.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_counters_accumulate_cost() {
        let counters = CacheCounters::default();
        counters.add_cost_saved(0.25);
        counters.add_cost_saved(0.5);
        counters.hits.fetch_add(2, Ordering::Relaxed);
        let stats = counters.snapshot(7);
        assert!((stats.cost_saved - 0.75).abs() < 1e-12);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 7);
    }
}
