//! Weighted combination of independent estimates.
//!
//! Sources that agree produce a narrow range and keep their confidence;
//! sources that diverge widen the range and discount confidence by the
//! relative spread.

use crate::config::EnsembleConfig;
use crate::error::{EnsembleError, NourishResult};
use crate::nutrition::NutritionRecord;
use serde::{Deserialize, Serialize};

/// One oracle's estimate of a scalar quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateSource {
    pub source_id: String,
    /// Relative weight. Normalized across the ensemble before use.
    pub weight: f64,
    pub estimate: f64,
    /// Self-reported confidence in [0, 1].
    pub reported_confidence: f64,
}

impl EstimateSource {
    pub fn new(
        source_id: impl Into<String>,
        weight: f64,
        estimate: f64,
        reported_confidence: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            weight,
            estimate,
            reported_confidence,
        }
    }
}

/// Closed interval `[low, high]` around the ensemble mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateRange {
    pub low: f64,
    pub high: f64,
}

impl EstimateRange {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Combined estimate with its uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub mean: f64,
    /// Weighted population variance (or the single-source fallback).
    pub variance: f64,
    pub std_dev: f64,
    pub range: EstimateRange,
    /// Agreement-discounted weighted confidence, in [0, 1].
    pub confidence: f64,
    pub source_count: usize,
    /// `(source_id, weight)` after normalization.
    pub normalized_weights: Vec<(String, f64)>,
}

/// Combines estimate sources into a mean/variance/confidence triple.
#[derive(Debug, Clone, Default)]
pub struct UncertaintyEnsemble {
    config: EnsembleConfig,
}

impl UncertaintyEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with a custom configuration, rejecting invalid settings.
    pub fn with_config(config: EnsembleConfig) -> NourishResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Combine `sources`.
    ///
    /// # Errors
    ///
    /// - `EmptyInput` when `sources` is empty (caller bug, nothing to combine)
    /// - `InvalidWeight` for negative or non-finite weights
    /// - `ZeroTotalWeight` when weights cannot be normalized
    /// - `InvalidConfidence` for confidences outside [0, 1]
    /// - `NonFiniteEstimate` for NaN or infinite estimates
    pub fn combine(&self, sources: &[EstimateSource]) -> NourishResult<EnsembleResult> {
        if sources.is_empty() {
            return Err(EnsembleError::EmptyInput.into());
        }
        for source in sources {
            check_source(source)?;
        }

        // Scale by the largest weight first so huge finite weights cannot sum to inf.
        let max_weight = sources.iter().map(|s| s.weight).fold(0.0, f64::max);
        if max_weight <= 0.0 {
            return Err(EnsembleError::ZeroTotalWeight.into());
        }
        let total_weight: f64 = sources.iter().map(|s| s.weight / max_weight).sum();
        let weights: Vec<f64> = sources
            .iter()
            .map(|s| s.weight / max_weight / total_weight)
            .collect();

        let mean: f64 = sources
            .iter()
            .zip(&weights)
            .map(|(s, w)| w * s.estimate)
            .sum();
        let weighted_confidence: f64 = sources
            .iter()
            .zip(&weights)
            .map(|(s, w)| w * s.reported_confidence)
            .sum();

        let variance = if sources.len() == 1 {
            // No disagreement to measure; assume spread tracks self-reported unreliability.
            (mean * (1.0 - sources[0].reported_confidence)).powi(2)
        } else {
            sources
                .iter()
                .zip(&weights)
                .map(|(s, w)| w * (s.estimate - mean).powi(2))
                .sum()
        };
        let std_dev = variance.sqrt();

        let agreement = 1.0 - (std_dev / mean.max(self.config.epsilon)).min(1.0);
        let confidence = (agreement * weighted_confidence).clamp(0.0, 1.0);

        let half_width = self.config.range_sigmas * std_dev;
        let range = EstimateRange {
            low: (mean - half_width).max(0.0),
            high: mean + half_width,
        };

        Ok(EnsembleResult {
            mean,
            variance,
            std_dev,
            range,
            confidence,
            source_count: sources.len(),
            normalized_weights: sources
                .iter()
                .zip(weights)
                .map(|(s, w)| (s.source_id.clone(), w))
                .collect(),
        })
    }

    /// Combine full nutrition records field by field.
    pub fn combine_nutrition(
        &self,
        estimates: &[NutritionEstimate],
    ) -> NourishResult<NutritionEnsemble> {
        let field = |pick: fn(&NutritionRecord) -> f64| -> NourishResult<EnsembleResult> {
            let sources: Vec<EstimateSource> = estimates
                .iter()
                .map(|e| {
                    EstimateSource::new(
                        e.source_id.clone(),
                        e.weight,
                        pick(&e.record),
                        e.reported_confidence,
                    )
                })
                .collect();
            self.combine(&sources)
        };

        Ok(NutritionEnsemble {
            calories: field(|r| r.calories)?,
            protein_g: field(|r| r.protein_g)?,
            carbs_g: field(|r| r.carbs_g)?,
            fat_g: field(|r| r.fat_g)?,
            fiber_g: field(|r| r.fiber_g.unwrap_or(0.0))?,
        })
    }
}

fn check_source(source: &EstimateSource) -> Result<(), EnsembleError> {
    if !source.weight.is_finite() || source.weight < 0.0 {
        return Err(EnsembleError::InvalidWeight {
            source_id: source.source_id.clone(),
            weight: source.weight,
        });
    }
    if !source.estimate.is_finite() {
        return Err(EnsembleError::NonFiniteEstimate {
            source_id: source.source_id.clone(),
            estimate: source.estimate,
        });
    }
    if !(0.0..=1.0).contains(&source.reported_confidence) {
        return Err(EnsembleError::InvalidConfidence {
            source_id: source.source_id.clone(),
            confidence: source.reported_confidence,
        });
    }
    Ok(())
}

/// Combine with the default configuration.
pub fn combine(sources: &[EstimateSource]) -> NourishResult<EnsembleResult> {
    UncertaintyEnsemble::new().combine(sources)
}

/// One oracle's full nutrition estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionEstimate {
    pub source_id: String,
    pub weight: f64,
    pub record: NutritionRecord,
    pub reported_confidence: f64,
}

impl NutritionEstimate {
    pub fn new(
        source_id: impl Into<String>,
        weight: f64,
        record: NutritionRecord,
        reported_confidence: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            weight,
            record,
            reported_confidence,
        }
    }
}

/// Per-field ensemble over nutrition records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionEnsemble {
    pub calories: EnsembleResult,
    pub protein_g: EnsembleResult,
    pub carbs_g: EnsembleResult,
    pub fat_g: EnsembleResult,
    pub fiber_g: EnsembleResult,
}

impl NutritionEnsemble {
    /// Record built from the per-field means.
    pub fn point_estimate(&self) -> NutritionRecord {
        NutritionRecord {
            calories: self.calories.mean,
            protein_g: self.protein_g.mean,
            carbs_g: self.carbs_g.mean,
            fat_g: self.fat_g.mean,
            fiber_g: Some(self.fiber_g.mean),
        }
    }

    /// Headline confidence: the calorie field's.
    pub fn confidence(&self) -> f64 {
        self.calories.confidence
    }
}

// ============================================================================
// TESTS
// ============================================================================
