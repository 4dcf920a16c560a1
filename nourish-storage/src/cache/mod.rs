//! Response cache with fail-open semantics.
//!
//! Caches AI completions under a fingerprint of the normalized request
//! (query text, persona, mode, intensity). Expired entries read as misses and
//! are removed later by the sweep task. Storage errors never propagate to the
//! request path: reads become misses and writes are dropped with a warning.
//!
//! # Example
//!
//! ```ignore
//! let cache = ResponseCache::new(Arc::new(LmdbCacheBackend::new(path, 256)?), config)?;
//! let key = CacheKey::new("Is oatmeal a good pre-run meal?", "coach-gentle", "chat", 0.3);
//!
//! match cache.get(&key).await {
//!     CacheLookup::Hit(hit) => respond(&hit.entry.response_text),
//!     CacheLookup::Miss(_) => {
//!         let completion = llm.complete(&key).await?;
//!         cache.put(&key, &completion).await;
//!         respond(&completion.text)
//!     }
//! }
//! ```

pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod response_cache;
pub mod sweeper;
pub mod traits;

pub use key::CacheKey;
pub use lmdb_backend::LmdbCacheBackend;
pub use memory_backend::InMemoryCacheBackend;
pub use response_cache::{CacheHit, CacheLookup, CachedResponse, MissReason, ResponseCache};
pub use sweeper::{cache_sweep_task, SweepConfig, SweepMetrics, SweepSnapshot};
pub use traits::{CacheStats, ResponseCacheBackend};
