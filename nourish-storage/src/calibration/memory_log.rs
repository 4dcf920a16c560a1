//! In-memory calibration log.

use std::sync::RwLock;

use async_trait::async_trait;
use nourish_core::{CalibrationRecord, NourishResult, StorageError, Timestamp};

use super::traits::CalibrationLog;

/// Vec-backed log kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryCalibrationLog {
    records: RwLock<Vec<CalibrationRecord>>,
}

impl InMemoryCalibrationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalibrationLog for InMemoryCalibrationLog {
    async fn append(&self, record: CalibrationRecord) -> NourishResult<()> {
        let mut records = self.records.write().map_err(|_| StorageError::LockPoisoned)?;
        records.push(record);
        Ok(())
    }

    async fn snapshot(&self, since: Option<Timestamp>) -> NourishResult<Vec<CalibrationRecord>> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(match since {
            Some(since) => records
                .iter()
                .filter(|r| r.created_at >= since)
                .cloned()
                .collect(),
            None => records.clone(),
        })
    }

    async fn prune(
        &self,
        before: Option<Timestamp>,
        keep_latest: Option<usize>,
    ) -> NourishResult<u64> {
        let mut records = self.records.write().map_err(|_| StorageError::LockPoisoned)?;
        let original = records.len();

        if let Some(before) = before {
            records.retain(|r| r.created_at >= before);
        }
        if let Some(keep) = keep_latest {
            if records.len() > keep {
                // Rank by age without disturbing insertion order. UUIDv7 ids
                // break ties between equal timestamps.
                let mut oldest_first: Vec<usize> = (0..records.len()).collect();
                oldest_first.sort_by(|&a, &b| {
                    records[a]
                        .created_at
                        .cmp(&records[b].created_at)
                        .then_with(|| records[a].record_id.cmp(&records[b].record_id))
                });
                let mut evict = vec![false; records.len()];
                for &i in &oldest_first[..records.len() - keep] {
                    evict[i] = true;
                }
                let mut index = 0;
                records.retain(|_| {
                    let keep = !evict[index];
                    index += 1;
                    keep
                });
            }
        }

        Ok((original - records.len()) as u64)
    }

    async fn len(&self) -> NourishResult<usize> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.len())
    }
}
