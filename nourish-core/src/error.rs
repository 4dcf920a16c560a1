//! Error types for nourish operations

use std::time::Duration;
use thiserror::Error;

/// Storage layer errors (cache backend or calibration log).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage operation {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Nutrition input errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid nutrition input for {field}: {value}")]
    InvalidNutritionInput { field: String, value: f64 },

    #[error("Non-numeric value for nutrition field {field}")]
    NonNumericField { field: String },

    #[error("Required nutrition field missing: {field}")]
    MissingField { field: String },

    #[error("Nutrition payload must be an object, got {kind}")]
    NotAnObject { kind: String },
}

/// Ensemble precondition violations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EnsembleError {
    #[error("Ensemble requires at least one estimate source")]
    EmptyInput,

    #[error("Invalid weight {weight} for source {source_id}")]
    InvalidWeight { source_id: String, weight: f64 },

    #[error("Total ensemble weight is zero")]
    ZeroTotalWeight,

    #[error("Reported confidence {confidence} for source {source_id} is outside [0, 1]")]
    InvalidConfidence { source_id: String, confidence: f64 },

    #[error("Non-finite estimate {estimate} from source {source_id}")]
    NonFiniteEstimate { source_id: String, estimate: f64 },
}

/// Calibration input errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalibrationError {
    #[error("Confidence {value} is outside [0, 1]")]
    InvalidConfidence { value: f64 },

    #[error("Temperature must be finite and positive, got {value}")]
    InvalidTemperature { value: f64 },

    #[error("Bin count must be at least 1, got {value}")]
    InvalidBinCount { value: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all nourish errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NourishError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Ensemble error: {0}")]
    Ensemble(#[from] EnsembleError),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Failure reported by a caller-supplied generator (e.g. the LLM call).
    #[error("Generation failed: {reason}")]
    Generation { reason: String },
}

impl NourishError {
    /// True for errors that callers should absorb as "degrade gracefully".
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for nourish operations.
pub type NourishResult<T> = Result<T, NourishError>;

// =============================================================================
// TESTS
// =============================================================================
