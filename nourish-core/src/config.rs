//! Configuration types
//!
//! Every tolerance and policy constant lives here rather than at its use site.
//! `Default` carries the reference values; `validate()` rejects anything out of
//! range before a component is built from it.

use crate::error::{ConfigError, NourishError, NourishResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reference absolute tolerance for the energy-balance check, in kcal.
pub const DEFAULT_TOLERANCE_ABS_KCAL: f64 = 20.0;
/// Reference relative error ceiling for the energy-balance check.
pub const DEFAULT_TOLERANCE_REL: f64 = 0.15;
/// Absolute error above which calories are replaced by the computed value.
pub const DEFAULT_CORRECTION_THRESHOLD_KCAL: f64 = 50.0;
/// Reference TTL for cached responses (7 days).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
/// Bound on a single storage round-trip before failing open.
pub const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 250;
/// Interval between background sweeps (daily).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;
/// Maximum keys deleted per sweep write batch.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 500;
/// Number of equal-width confidence bins for ECE.
pub const DEFAULT_CALIBRATION_BINS: usize = 10;

/// Tolerances for the nutrition energy-balance validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub tolerance_abs_kcal: f64,
    pub tolerance_rel: f64,
    pub correction_threshold_kcal: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            tolerance_abs_kcal: DEFAULT_TOLERANCE_ABS_KCAL,
            tolerance_rel: DEFAULT_TOLERANCE_REL,
            correction_threshold_kcal: DEFAULT_CORRECTION_THRESHOLD_KCAL,
        }
    }
}

/// Parameters for combining estimate sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Floor for the mean when computing relative spread.
    pub epsilon: f64,
    /// Half-width of the reported range in standard deviations.
    pub range_sigmas: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-9,
            range_sigmas: 2.0,
        }
    }
}

/// Response cache policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied by `put` when none is given.
    pub default_ttl: Duration,
    /// Upper bound on one backend call before the cache fails open.
    pub operation_timeout: Duration,
    /// How often the background sweep runs.
    pub sweep_interval: Duration,
    /// Keys deleted per write batch during a sweep.
    pub sweep_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            operation_timeout: Duration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the storage operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the sweep batch size.
    pub fn with_sweep_batch_size(mut self, batch_size: usize) -> Self {
        self.sweep_batch_size = batch_size;
        self
    }
}

/// Calibration tracking policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub num_bins: usize,
    /// Clamp applied to 0/1 confidences before the logit transform.
    pub epsilon: f64,
    /// Keep at most this many records when pruning.
    pub max_records: Option<usize>,
    /// Drop records older than this when pruning.
    pub max_age: Option<Duration>,
    /// Initial temperature used by `recalibrate` until a fit runs.
    pub temperature: f64,
    /// Upper bound on one log call before recording is skipped.
    pub operation_timeout: Duration,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            num_bins: DEFAULT_CALIBRATION_BINS,
            epsilon: 1e-6,
            max_records: None,
            max_age: None,
            temperature: 1.0,
            operation_timeout: Duration::from_millis(DEFAULT_STORAGE_TIMEOUT_MS),
        }
    }
}

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NourishConfig {
    pub validator: ValidatorConfig,
    pub ensemble: EnsembleConfig,
    pub cache: CacheConfig,
    pub calibration: CalibrationConfig,
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> NourishError {
    NourishError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn non_negative(field: &str, value: f64) -> NourishResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, value, "must be finite and non-negative"));
    }
    Ok(())
}

fn positive_duration(field: &str, value: Duration) -> NourishResult<()> {
    if value.is_zero() {
        return Err(invalid(field, format!("{:?}", value), "must be positive"));
    }
    Ok(())
}

impl ValidatorConfig {
    pub fn validate(&self) -> NourishResult<()> {
        non_negative("validator.tolerance_abs_kcal", self.tolerance_abs_kcal)?;
        non_negative("validator.correction_threshold_kcal", self.correction_threshold_kcal)?;
        if !(0.0..=1.0).contains(&self.tolerance_rel) {
            return Err(invalid(
                "validator.tolerance_rel",
                self.tolerance_rel,
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> NourishResult<()> {
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(invalid("ensemble.epsilon", self.epsilon, "must be positive"));
        }
        if !self.range_sigmas.is_finite() || self.range_sigmas <= 0.0 {
            return Err(invalid(
                "ensemble.range_sigmas",
                self.range_sigmas,
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> NourishResult<()> {
        positive_duration("cache.default_ttl", self.default_ttl)?;
        positive_duration("cache.operation_timeout", self.operation_timeout)?;
        positive_duration("cache.sweep_interval", self.sweep_interval)?;
        if self.sweep_batch_size == 0 {
            return Err(invalid(
                "cache.sweep_batch_size",
                self.sweep_batch_size,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> NourishResult<()> {
        if self.num_bins == 0 {
            return Err(invalid("calibration.num_bins", self.num_bins, "must be at least 1"));
        }
        if !(self.epsilon > 0.0 && self.epsilon < 0.5) {
            return Err(invalid(
                "calibration.epsilon",
                self.epsilon,
                "must be in (0.0, 0.5)",
            ));
        }
        if self.max_records == Some(0) {
            return Err(invalid("calibration.max_records", 0, "must be at least 1"));
        }
        if let Some(max_age) = self.max_age {
            positive_duration("calibration.max_age", max_age)?;
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(invalid(
                "calibration.temperature",
                self.temperature,
                "must be finite and positive",
            ));
        }
        positive_duration("calibration.operation_timeout", self.operation_timeout)?;
        Ok(())
    }
}

impl NourishConfig {
    /// Validate every section.
    /// Returns Ok(()) if valid, Err(NourishError::Config) naming the first bad field.
    pub fn validate(&self) -> NourishResult<()> {
        self.validator.validate()?;
        self.ensemble.validate()?;
        self.cache.validate()?;
        self.calibration.validate()?;
        Ok(())
    }

    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn from_toml_str(source: &str) -> NourishResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// TESTS
// ============================================================================
