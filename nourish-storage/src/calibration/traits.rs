//! Calibration log trait.

use async_trait::async_trait;
use nourish_core::{CalibrationRecord, NourishResult, Timestamp};

/// Append-only store of calibration records.
///
/// Records are never mutated after `append`. `snapshot` may run concurrently
/// with appends and need not observe the newest ones.
#[async_trait]
pub trait CalibrationLog: Send + Sync {
    async fn append(&self, record: CalibrationRecord) -> NourishResult<()>;

    /// Records with `created_at >= since`, or all records when `since` is `None`.
    async fn snapshot(&self, since: Option<Timestamp>) -> NourishResult<Vec<CalibrationRecord>>;

    /// Drop records created before `before`, then keep only the newest
    /// `keep_latest`. Returns the number removed.
    async fn prune(
        &self,
        before: Option<Timestamp>,
        keep_latest: Option<usize>,
    ) -> NourishResult<u64>;

    async fn len(&self) -> NourishResult<usize>;

    async fn is_empty(&self) -> NourishResult<bool> {
        Ok(self.len().await? == 0)
    }
}
