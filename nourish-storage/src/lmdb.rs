//! Shared LMDB plumbing for the heed-backed stores.
//!
//! heed calls block: a write transaction waits on LMDB's single writer lock.
//! Every store operation therefore runs on tokio's blocking pool through
//! [`run_blocking`], so the caller's timeout can fire while LMDB waits.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use nourish_core::{NourishError, NourishResult, StorageError};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The blocking task panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbError> for NourishError {
    fn from(e: LmdbError) -> Self {
        let storage = match e {
            LmdbError::EnvOpen(_) | LmdbError::DbOpen(_) | LmdbError::Io(_) | LmdbError::Task(_) => {
                StorageError::Unavailable {
                    reason: e.to_string(),
                }
            }
            LmdbError::Serialization(_) | LmdbError::Deserialization(_) => {
                StorageError::Serialization {
                    reason: e.to_string(),
                }
            }
            LmdbError::Transaction(_) => StorageError::TransactionFailed {
                reason: e.to_string(),
            },
        };
        NourishError::Storage(storage)
    }
}

pub(crate) type RawDatabase = Database<Bytes, Bytes>;

pub(crate) fn txn_err(e: heed::Error) -> LmdbError {
    LmdbError::Transaction(e.to_string())
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, LmdbError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbError::Deserialization(e.to_string()))
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, LmdbError> {
    serde_json::to_vec(value).map_err(|e| LmdbError::Serialization(e.to_string()))
}

/// Open (or create) an environment at `path` holding one unnamed database.
pub(crate) fn open_env(path: &Path, max_size_mb: usize) -> Result<(Env, RawDatabase), LmdbError> {
    std::fs::create_dir_all(path)?;

    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(max_size_mb * 1024 * 1024)
            .max_dbs(1)
            .open(path)
    }
    .map_err(|e| LmdbError::EnvOpen(e.to_string()))?;

    let mut wtxn = env.write_txn().map_err(txn_err)?;
    let db: RawDatabase = env
        .create_database(&mut wtxn, None)
        .map_err(|e| LmdbError::DbOpen(e.to_string()))?;
    wtxn.commit().map_err(txn_err)?;

    Ok((env, db))
}

/// Run `op` against the environment on the blocking pool.
///
/// If the awaiting future is dropped (for example by a timeout) the
/// operation still runs to completion in the background.
pub(crate) async fn run_blocking<T, F>(env: &Env, db: RawDatabase, op: F) -> NourishResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Env, RawDatabase) -> Result<T, LmdbError> + Send + 'static,
{
    let env = env.clone();
    tokio::task::spawn_blocking(move || op(&env, db))
        .await
        .map_err(|e| LmdbError::Task(e.to_string()))?
        .map_err(NourishError::from)
}
