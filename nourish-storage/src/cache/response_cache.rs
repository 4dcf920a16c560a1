//! Fail-open response cache.
//!
//! Wraps a [`ResponseCacheBackend`] with the expiry policy, hit accounting and
//! a bounded timeout on every backend call. Storage trouble never reaches the
//! caller: reads degrade to misses and writes are logged and dropped.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use nourish_core::{
    CacheConfig, CacheEntry, Clock, Completion, NourishError, NourishResult, StorageError,
    SystemClock,
};

use super::key::CacheKey;
use super::traits::{CacheCounters, CacheStats, ResponseCacheBackend};

/// Why a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NotFound,
    Expired,
    StorageError,
    Timeout,
}

/// A live cached response and what serving it saved.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// The entry with `hit_count` already incremented.
    pub entry: CacheEntry,
    pub tokens_saved: u64,
    pub cost_saved: f64,
}

/// Result of [`ResponseCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CacheHit),
    Miss(MissReason),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn hit(&self) -> Option<&CacheHit> {
        match self {
            Self::Hit(hit) => Some(hit),
            Self::Miss(_) => None,
        }
    }

    pub fn miss_reason(&self) -> Option<MissReason> {
        match self {
            Self::Hit(_) => None,
            Self::Miss(reason) => Some(*reason),
        }
    }
}

/// Response served by [`ResponseCache::get_or_generate`].
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResponse {
    Cached(CacheHit),
    Generated(Completion),
}

impl CachedResponse {
    pub fn text(&self) -> &str {
        match self {
            Self::Cached(hit) => &hit.entry.response_text,
            Self::Generated(completion) => &completion.text,
        }
    }

    pub fn from_cache(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// Cache of AI responses keyed by [`CacheKey`].
///
/// # Example
///
/// ```ignore
/// let cache = ResponseCache::new(Arc::new(InMemoryCacheBackend::new()), CacheConfig::default())?;
/// let key = CacheKey::new("how much protein after a run?", "coach-gentle", "chat", 0.4);
///
/// let response = cache
///     .get_or_generate(&key, || async { llm.complete(prompt).await })
///     .await?;
/// ```
pub struct ResponseCache<B: ResponseCacheBackend> {
    backend: Arc<B>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    counters: CacheCounters,
}

impl<B: ResponseCacheBackend> ResponseCache<B> {
    pub fn new(backend: Arc<B>, config: CacheConfig) -> NourishResult<Self> {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Build with an explicit time source. Rejects an invalid `config`.
    pub fn with_clock(
        backend: Arc<B>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> NourishResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            clock,
            counters: CacheCounters::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = NourishResult<T>>,
    ) -> NourishResult<T> {
        let after = self.config.operation_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout { operation, after }.into()),
        }
    }

    fn record_miss(&self, reason: MissReason) -> CacheLookup {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        match reason {
            MissReason::Expired => {
                self.counters.expired_misses.fetch_add(1, Ordering::Relaxed);
            }
            MissReason::StorageError | MissReason::Timeout => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
            }
            MissReason::NotFound => {}
        }
        CacheLookup::Miss(reason)
    }

    /// Look up a live entry.
    ///
    /// Entries with `now >= expires_at` are misses; they stay in storage until
    /// the sweep. A hit increments `hit_count`. Storage errors and timeouts
    /// are misses.
    pub async fn get(&self, key: &CacheKey) -> CacheLookup {
        let fingerprint = key.fingerprint();
        let now = self.clock.now();

        let entry = match self.bounded("cache_get", self.backend.get(&fingerprint)).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return self.record_miss(MissReason::NotFound),
            Err(e) => {
                let reason = if is_timeout(&e) {
                    MissReason::Timeout
                } else {
                    MissReason::StorageError
                };
                tracing::warn!(error = %e, key = %fingerprint, "Cache read failed, treating as miss");
                return self.record_miss(reason);
            }
        };

        if entry.is_expired_at(now) {
            return self.record_miss(MissReason::Expired);
        }

        let mut entry = entry;
        match self
            .bounded("cache_record_hit", self.backend.record_hit(&fingerprint))
            .await
        {
            Ok(Some(count)) => entry.hit_count = count,
            Ok(None) => entry.hit_count += 1,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, key = %fingerprint, "Failed to record cache hit");
                entry.hit_count += 1;
            }
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        self.counters
            .tokens_saved
            .fetch_add(entry.tokens_used, Ordering::Relaxed);
        self.counters.add_cost_saved(entry.cost_units);

        CacheLookup::Hit(CacheHit {
            tokens_saved: entry.tokens_used,
            cost_saved: entry.cost_units,
            entry,
        })
    }

    /// Store a response with the default TTL. Returns whether it was stored.
    pub async fn put(&self, key: &CacheKey, completion: &Completion) -> bool {
        self.put_with_ttl(key, completion, self.config.default_ttl)
            .await
    }

    /// Store a response with an explicit TTL, overwriting any previous entry.
    ///
    /// A zero TTL writes an entry that is already expired. Storage failures
    /// are logged and swallowed.
    pub async fn put_with_ttl(&self, key: &CacheKey, completion: &Completion, ttl: Duration) -> bool {
        if completion.text.is_empty() {
            tracing::debug!(key = %key.fingerprint(), "Empty response not cached");
            return false;
        }

        let entry = self.build_entry(key, completion, ttl);
        let fingerprint = entry.key.clone();
        match self.bounded("cache_put", self.backend.upsert(entry)).await {
            Ok(()) => true,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, key = %fingerprint, "Cache write failed, response not cached");
                false
            }
        }
    }

    fn build_entry(&self, key: &CacheKey, completion: &Completion, ttl: Duration) -> CacheEntry {
        let now = self.clock.now();
        let (created_at, expires_at) = if ttl.is_zero() {
            // expires_at must stay strictly after created_at.
            (now - chrono::Duration::microseconds(1), now)
        } else {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
            (now, now.checked_add_signed(ttl).unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC))
        };
        let cost_units = if completion.cost_units.is_finite() && completion.cost_units > 0.0 {
            completion.cost_units
        } else {
            0.0
        };

        CacheEntry {
            key: key.fingerprint(),
            response_text: completion.text.clone(),
            model_used: completion.model.clone(),
            tokens_used: completion.tokens_used,
            cost_units,
            hit_count: 0,
            created_at,
            expires_at,
        }
    }

    /// Serve from cache, or run `generator` and cache its output.
    ///
    /// Generator errors propagate; cache errors never do.
    pub async fn get_or_generate<F, Fut>(
        &self,
        key: &CacheKey,
        generator: F,
    ) -> NourishResult<CachedResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = NourishResult<Completion>>,
    {
        if let CacheLookup::Hit(hit) = self.get(key).await {
            return Ok(CachedResponse::Cached(hit));
        }
        let completion = generator().await?;
        self.put(key, &completion).await;
        Ok(CachedResponse::Generated(completion))
    }

    /// Remove one entry.
    pub async fn invalidate(&self, key: &CacheKey) -> NourishResult<bool> {
        self.bounded("cache_delete", self.backend.delete(&key.fingerprint()))
            .await
    }

    /// Delete every entry with `expires_at < now`, in batches of
    /// `sweep_batch_size`. Returns the number removed.
    pub async fn sweep_expired(&self) -> NourishResult<u64> {
        let now = self.clock.now();
        let keys = self.backend.expired_keys(now).await?;
        let batch_size = self.config.sweep_batch_size.max(1);

        let mut removed = 0;
        for batch in keys.chunks(batch_size) {
            removed += self.backend.delete_expired(batch, now).await?;
        }
        if removed > 0 {
            tracing::debug!(removed, candidates = keys.len(), "Swept expired cache entries");
        }
        Ok(removed)
    }

    /// Current counters plus the backend's entry count.
    pub async fn stats(&self) -> CacheStats {
        let entry_count = match self
            .bounded("cache_entry_count", self.backend.entry_count())
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read cache entry count");
                0
            }
        };
        self.counters.snapshot(entry_count)
    }
}

fn is_timeout(e: &NourishError) -> bool {
    matches!(e, NourishError::Storage(StorageError::Timeout { .. }))
}

// ============================================================================
// TESTS
// ============================================================================
