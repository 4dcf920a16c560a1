//! NOURISH Storage - Cache and Calibration Backends
//!
//! The I/O-facing half of the pipeline: the fail-open response cache with
//! its in-memory and LMDB backends and sweep task, and the calibration log
//! behind `CalibrationTracker`, each with in-memory and LMDB stores. Pure
//! computation lives in `nourish-core`.

pub mod cache;
pub mod calibration;
pub mod lmdb;

pub use cache::{
    cache_sweep_task, CacheHit, CacheKey, CacheLookup, CacheStats, CachedResponse,
    InMemoryCacheBackend, LmdbCacheBackend, MissReason, ResponseCache,
    ResponseCacheBackend, SweepConfig, SweepMetrics, SweepSnapshot,
};
pub use calibration::{
    CalibrationLog, CalibrationTracker, InMemoryCalibrationLog, LmdbCalibrationLog,
};
pub use lmdb::LmdbError;
