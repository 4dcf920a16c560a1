//! LMDB-backed response cache.
//!
//! Uses the heed crate (Rust bindings for LMDB). Entries are stored as JSON
//! under the fingerprint bytes in a single unnamed database. Every operation
//! runs on the blocking pool, so a caller waiting on the writer lock can
//! still time out.
//!
//! # Transactions
//!
//! - `get`, `expired_keys`, `entry_count` use read transactions
//! - `upsert`, `delete` use one write transaction each
//! - `record_hit` reads, increments and writes inside one write transaction,
//!   so concurrent hits are never lost
//! - `delete_expired` re-checks expiry for every key inside its write
//!   transaction, so an entry re-put after collection survives the sweep

use std::path::Path;

use async_trait::async_trait;
use heed::{Env, RoTxn};
use nourish_core::{CacheEntry, NourishResult, Timestamp};

use super::traits::ResponseCacheBackend;
use crate::lmdb::{decode, encode, open_env, run_blocking, txn_err, LmdbError, RawDatabase};

/// LMDB-backed response cache store.
///
/// # Example
///
/// ```ignore
/// use nourish_storage::cache::{LmdbCacheBackend, ResponseCache};
///
/// let backend = LmdbCacheBackend::new("/var/lib/nourish/cache", 256)?;
/// let cache = ResponseCache::new(Arc::new(backend), CacheConfig::default())?;
/// ```
pub struct LmdbCacheBackend {
    env: Env,
    db: RawDatabase,
}

impl LmdbCacheBackend {
    /// Open (or create) an LMDB cache at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbError> {
        let (env, db) = open_env(path.as_ref(), max_size_mb)?;
        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB response cache");
        Ok(Self { env, db })
    }
}

fn read(db: RawDatabase, rtxn: &RoTxn, key: &str) -> Result<Option<CacheEntry>, LmdbError> {
    match db.get(rtxn, key.as_bytes()).map_err(txn_err)? {
        Some(bytes) => decode(bytes).map(Some),
        None => Ok(None),
    }
}

#[async_trait]
impl ResponseCacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> NourishResult<Option<CacheEntry>> {
        let key = key.to_string();
        run_blocking(&self.env, self.db, move |env, db| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            read(db, &rtxn, &key)
        })
        .await
    }

    async fn upsert(&self, entry: CacheEntry) -> NourishResult<()> {
        run_blocking(&self.env, self.db, move |env, db| {
            let bytes = encode(&entry)?;
            let mut wtxn = env.write_txn().map_err(txn_err)?;
            db.put(&mut wtxn, entry.key.as_bytes(), &bytes)
                .map_err(txn_err)?;
            wtxn.commit().map_err(txn_err)
        })
        .await
    }

    async fn record_hit(&self, key: &str) -> NourishResult<Option<u64>> {
        let key = key.to_string();
        run_blocking(&self.env, self.db, move |env, db| {
            let mut wtxn = env.write_txn().map_err(txn_err)?;
            let Some(mut entry) = read(db, &wtxn, &key)? else {
                return Ok(None);
            };
            entry.hit_count += 1;
            let bytes = encode(&entry)?;
            db.put(&mut wtxn, key.as_bytes(), &bytes).map_err(txn_err)?;
            wtxn.commit().map_err(txn_err)?;
            Ok(Some(entry.hit_count))
        })
        .await
    }

    async fn delete(&self, key: &str) -> NourishResult<bool> {
        let key = key.to_string();
        run_blocking(&self.env, self.db, move |env, db| {
            let mut wtxn = env.write_txn().map_err(txn_err)?;
            let deleted = db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
            wtxn.commit().map_err(txn_err)?;
            Ok(deleted)
        })
        .await
    }

    async fn expired_keys(&self, now: Timestamp) -> NourishResult<Vec<String>> {
        run_blocking(&self.env, self.db, move |env, db| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            let mut keys = Vec::new();
            for result in db.iter(&rtxn).map_err(txn_err)? {
                let (key, bytes) = result.map_err(txn_err)?;
                match decode::<CacheEntry>(bytes) {
                    Ok(entry) if entry.is_sweepable_at(now) => keys.push(entry.key),
                    Ok(_) => {}
                    Err(e) => {
                        // Unreadable rows would otherwise never be removed.
                        tracing::warn!(error = %e, "Undecodable cache row scheduled for removal");
                        keys.push(String::from_utf8_lossy(key).into_owned());
                    }
                }
            }
            Ok(keys)
        })
        .await
    }

    async fn delete_expired(&self, keys: &[String], now: Timestamp) -> NourishResult<u64> {
        let keys = keys.to_vec();
        run_blocking(&self.env, self.db, move |env, db| {
            let mut wtxn = env.write_txn().map_err(txn_err)?;
            let mut removed = 0u64;
            for key in &keys {
                let still_expired = match read(db, &wtxn, key) {
                    Ok(Some(entry)) => entry.is_sweepable_at(now),
                    Ok(None) => false,
                    Err(LmdbError::Deserialization(_)) => true,
                    Err(e) => return Err(e),
                };
                if still_expired && db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)? {
                    removed += 1;
                }
            }
            wtxn.commit().map_err(txn_err)?;
            Ok(removed)
        })
        .await
    }

    async fn entry_count(&self) -> NourishResult<u64> {
        run_blocking(&self.env, self.db, |env, db| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            db.len(&rtxn).map_err(txn_err)
        })
        .await
    }
}
