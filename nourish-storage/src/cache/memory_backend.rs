//! In-memory cache backend.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use nourish_core::{CacheEntry, NourishResult, StorageError, Timestamp};

use super::traits::ResponseCacheBackend;

/// HashMap-backed store. Used for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> NourishResult<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn upsert(&self, entry: CacheEntry) -> NourishResult<()> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn record_hit(&self, key: &str) -> NourishResult<Option<u64>> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get_mut(key).map(|entry| {
            entry.hit_count += 1;
            entry.hit_count
        }))
    }

    async fn delete(&self, key: &str) -> NourishResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    async fn expired_keys(&self, now: Timestamp) -> NourishResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries
            .values()
            .filter(|e| e.is_sweepable_at(now))
            .map(|e| e.key.clone())
            .collect())
    }

    async fn delete_expired(&self, keys: &[String], now: Timestamp) -> NourishResult<u64> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let mut removed = 0;
        for key in keys {
            if entries.get(key).is_some_and(|e| e.is_sweepable_at(now)) {
                entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn entry_count(&self) -> NourishResult<u64> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.len() as u64)
    }
}
