//! NOURISH Core - Types and Pure Computation
//!
//! Entities, configuration, errors, and the I/O-free parts of the AI
//! response pipeline: nutrition constraint validation, multi-source
//! estimate ensembles, and calibration metrics. Storage lives in
//! `nourish-storage`.

use chrono::{DateTime, Utc};

pub mod calibration;
pub mod clock;
pub mod config;
pub mod ensemble;
pub mod entities;
pub mod error;
pub mod nutrition;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use calibration::{
    apply_temperature_scaling, apply_temperature_scaling_with_epsilon, brier_score,
    calibration_curve, compute_ece, fit_temperature, maximum_calibration_error, CalibrationBin,
    CalibrationRecord, CalibrationReport, TemperatureFit, DEFAULT_CONFIDENCE_EPSILON,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, CalibrationConfig, EnsembleConfig, NourishConfig, ValidatorConfig,
    DEFAULT_CACHE_TTL_SECS, DEFAULT_CALIBRATION_BINS, DEFAULT_CORRECTION_THRESHOLD_KCAL,
    DEFAULT_STORAGE_TIMEOUT_MS, DEFAULT_SWEEP_BATCH_SIZE, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_TOLERANCE_ABS_KCAL, DEFAULT_TOLERANCE_REL,
};
pub use ensemble::{
    EnsembleResult, EstimateRange, EstimateSource, NutritionEnsemble, NutritionEstimate,
    UncertaintyEnsemble,
};
pub use entities::{CacheEntry, Completion};
pub use error::{
    CalibrationError, ConfigError, EnsembleError, NourishError, NourishResult, StorageError,
    ValidationError,
};
pub use nutrition::{NutritionRecord, NutritionValidator, ValidationIssue, ValidationResult};
