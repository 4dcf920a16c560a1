//! LMDB-backed calibration log.
//!
//! Records are stored as JSON keyed by their UUIDv7 id bytes, so LMDB's key
//! order is creation order. Like the response cache, every operation runs on
//! the blocking pool.

use std::path::Path;

use async_trait::async_trait;
use heed::Env;
use nourish_core::{CalibrationRecord, NourishResult, Timestamp};

use super::traits::CalibrationLog;
use crate::lmdb::{decode, encode, open_env, run_blocking, txn_err, LmdbError, RawDatabase};

/// Persistent calibration log.
pub struct LmdbCalibrationLog {
    env: Env,
    db: RawDatabase,
}

impl LmdbCalibrationLog {
    /// Open (or create) a log at `path` with a map of `max_size_mb` megabytes.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbError> {
        let (env, db) = open_env(path.as_ref(), max_size_mb)?;
        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB calibration log");
        Ok(Self { env, db })
    }
}

#[async_trait]
impl CalibrationLog for LmdbCalibrationLog {
    async fn append(&self, record: CalibrationRecord) -> NourishResult<()> {
        run_blocking(&self.env, self.db, move |env, db| {
            let bytes = encode(&record)?;
            let mut wtxn = env.write_txn().map_err(txn_err)?;
            db.put(&mut wtxn, record.record_id.as_bytes(), &bytes)
                .map_err(txn_err)?;
            wtxn.commit().map_err(txn_err)
        })
        .await
    }

    async fn snapshot(&self, since: Option<Timestamp>) -> NourishResult<Vec<CalibrationRecord>> {
        run_blocking(&self.env, self.db, move |env, db| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            let mut records = Vec::new();
            for result in db.iter(&rtxn).map_err(txn_err)? {
                let (_, bytes) = result.map_err(txn_err)?;
                match decode::<CalibrationRecord>(bytes) {
                    Ok(record) if since.map_or(true, |since| record.created_at >= since) => {
                        records.push(record)
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Skipping undecodable calibration record"),
                }
            }
            Ok(records)
        })
        .await
    }

    async fn prune(
        &self,
        before: Option<Timestamp>,
        keep_latest: Option<usize>,
    ) -> NourishResult<u64> {
        run_blocking(&self.env, self.db, move |env, db| {
            let mut wtxn = env.write_txn().map_err(txn_err)?;

            let mut evict: Vec<Vec<u8>> = Vec::new();
            let mut live: Vec<(Vec<u8>, CalibrationRecord)> = Vec::new();
            for result in db.iter(&wtxn).map_err(txn_err)? {
                let (key, bytes) = result.map_err(txn_err)?;
                match decode::<CalibrationRecord>(bytes) {
                    Ok(record) if before.map_or(false, |before| record.created_at < before) => {
                        evict.push(key.to_vec())
                    }
                    Ok(record) => live.push((key.to_vec(), record)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Pruning undecodable calibration record");
                        evict.push(key.to_vec());
                    }
                }
            }

            if let Some(keep) = keep_latest {
                if live.len() > keep {
                    live.sort_by(|(_, a), (_, b)| {
                        a.created_at
                            .cmp(&b.created_at)
                            .then_with(|| a.record_id.cmp(&b.record_id))
                    });
                    let excess = live.len() - keep;
                    evict.extend(live.drain(..excess).map(|(key, _)| key));
                }
            }

            let mut removed = 0u64;
            for key in &evict {
                if db.delete(&mut wtxn, key.as_slice()).map_err(txn_err)? {
                    removed += 1;
                }
            }
            wtxn.commit().map_err(txn_err)?;
            Ok(removed)
        })
        .await
    }

    async fn len(&self) -> NourishResult<usize> {
        let count = run_blocking(&self.env, self.db, |env, db| {
            let rtxn = env.read_txn().map_err(txn_err)?;
            db.len(&rtxn).map_err(txn_err)
        })
        .await?;
        Ok(count as usize)
    }
}
