//! Calibration log storage and the running tracker.

pub mod lmdb_log;
pub mod memory_log;
pub mod tracker;
pub mod traits;

pub use lmdb_log::LmdbCalibrationLog;
pub use memory_log::InMemoryCalibrationLog;
pub use tracker::CalibrationTracker;
pub use traits::CalibrationLog;
