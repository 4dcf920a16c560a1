//! Calibration metrics over (confidence, outcome) pairs.
//!
//! Pure functions only. Persistence and the running tracker live in
//! `nourish-storage`.

use crate::config::DEFAULT_CALIBRATION_BINS;
use crate::error::{CalibrationError, NourishResult};
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clamp applied before the logit transform.
pub const DEFAULT_CONFIDENCE_EPSILON: f64 = 1e-6;

/// Grid searched by [`fit_temperature`], in twentieths: 0.05 ..= 5.0.
const TEMPERATURE_GRID_STEPS: u32 = 100;
const TEMPERATURE_GRID_DIVISOR: f64 = 20.0;

/// One past prediction and its eventual outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub record_id: Uuid,
    /// Confidence claimed at prediction time, in [0, 1].
    pub confidence: f64,
    pub was_correct: bool,
    pub created_at: Timestamp,
}

impl CalibrationRecord {
    /// Build a record, rejecting confidences outside [0, 1].
    pub fn new(confidence: f64, was_correct: bool, created_at: Timestamp) -> NourishResult<Self> {
        check_confidence(confidence)?;
        Ok(Self {
            record_id: Uuid::now_v7(),
            confidence,
            was_correct,
            created_at,
        })
    }

    fn outcome(&self) -> f64 {
        if self.was_correct {
            1.0
        } else {
            0.0
        }
    }
}

fn check_confidence(confidence: f64) -> Result<(), CalibrationError> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(CalibrationError::InvalidConfidence { value: confidence })
    }
}

fn check_bins(num_bins: usize) -> Result<(), CalibrationError> {
    if num_bins == 0 {
        Err(CalibrationError::InvalidBinCount { value: num_bins })
    } else {
        Ok(())
    }
}

/// One bucket of the reliability curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bin_center: f64,
    /// 0 for empty bins.
    pub mean_confidence: f64,
    /// 0 for empty bins.
    pub mean_accuracy: f64,
    pub count: usize,
}

#[derive(Default, Clone, Copy)]
struct BinAccumulator {
    confidence_sum: f64,
    correct_sum: f64,
    count: usize,
}

fn bin_index(confidence: f64, num_bins: usize) -> usize {
    ((confidence * num_bins as f64).floor() as usize).min(num_bins - 1)
}

fn accumulate(confidences: impl Iterator<Item = (f64, f64)>, num_bins: usize) -> Vec<BinAccumulator> {
    let mut bins = vec![BinAccumulator::default(); num_bins];
    for (confidence, outcome) in confidences {
        let bin = &mut bins[bin_index(confidence, num_bins)];
        bin.confidence_sum += confidence;
        bin.correct_sum += outcome;
        bin.count += 1;
    }
    bins
}

fn to_curve(bins: &[BinAccumulator]) -> Vec<CalibrationBin> {
    let n = bins.len() as f64;
    bins.iter()
        .enumerate()
        .map(|(i, b)| {
            let (mean_confidence, mean_accuracy) = if b.count == 0 {
                (0.0, 0.0)
            } else {
                (
                    b.confidence_sum / b.count as f64,
                    b.correct_sum / b.count as f64,
                )
            };
            CalibrationBin {
                bin_center: (i as f64 + 0.5) / n,
                mean_confidence,
                mean_accuracy,
                count: b.count,
            }
        })
        .collect()
}

fn ece_of(curve: &[CalibrationBin]) -> f64 {
    let total: usize = curve.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    curve
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| (b.mean_confidence - b.mean_accuracy).abs() * b.count as f64 / total as f64)
        .sum()
}

fn mce_of(curve: &[CalibrationBin]) -> f64 {
    curve
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| (b.mean_confidence - b.mean_accuracy).abs())
        .fold(0.0, f64::max)
}

/// Reliability curve with `num_bins` equal-width buckets over [0, 1].
pub fn calibration_curve(
    records: &[CalibrationRecord],
    num_bins: usize,
) -> NourishResult<Vec<CalibrationBin>> {
    check_bins(num_bins)?;
    let bins = accumulate(records.iter().map(|r| (r.confidence, r.outcome())), num_bins);
    Ok(to_curve(&bins))
}

/// Expected Calibration Error. Empty input yields 0.
pub fn compute_ece(records: &[CalibrationRecord], num_bins: usize) -> NourishResult<f64> {
    Ok(ece_of(&calibration_curve(records, num_bins)?))
}

/// Largest per-bucket gap between confidence and accuracy.
pub fn maximum_calibration_error(
    records: &[CalibrationRecord],
    num_bins: usize,
) -> NourishResult<f64> {
    Ok(mce_of(&calibration_curve(records, num_bins)?))
}

/// Mean squared error between confidence and outcome. Empty input yields 0.
pub fn brier_score(records: &[CalibrationRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records
        .iter()
        .map(|r| (r.confidence - r.outcome()).powi(2))
        .sum::<f64>()
        / records.len() as f64
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Returns the scaled confidence and whether the input had to be clamped.
fn scale(confidence: f64, temperature: f64, epsilon: f64) -> (f64, bool) {
    let clamped = confidence.clamp(epsilon, 1.0 - epsilon);
    let logit = (clamped / (1.0 - clamped)).ln();
    (sigmoid(logit / temperature), clamped != confidence)
}

/// Rescale `confidence` in logit space by `1 / temperature`.
///
/// Inputs of exactly 0 or 1 are clamped to `[epsilon, 1 - epsilon]` first and
/// logged as a data-quality signal.
pub fn apply_temperature_scaling_with_epsilon(
    confidence: f64,
    temperature: f64,
    epsilon: f64,
) -> NourishResult<f64> {
    check_confidence(confidence)?;
    if !temperature.is_finite() || temperature <= 0.0 {
        return Err(CalibrationError::InvalidTemperature { value: temperature }.into());
    }
    let (scaled, clamped) = scale(confidence, temperature, epsilon);
    if clamped {
        tracing::warn!(
            confidence,
            epsilon,
            "Degenerate confidence clamped before temperature scaling"
        );
    }
    Ok(scaled)
}

/// [`apply_temperature_scaling_with_epsilon`] with [`DEFAULT_CONFIDENCE_EPSILON`].
pub fn apply_temperature_scaling(confidence: f64, temperature: f64) -> NourishResult<f64> {
    apply_temperature_scaling_with_epsilon(confidence, temperature, DEFAULT_CONFIDENCE_EPSILON)
}

/// Outcome of a temperature grid search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureFit {
    pub temperature: f64,
    pub ece_before: f64,
    pub ece_after: f64,
    pub sample_count: usize,
}

impl TemperatureFit {
    pub fn improvement(&self) -> f64 {
        self.ece_before - self.ece_after
    }
}

/// Find the temperature in [0.05, 5.0] that minimizes ECE.
///
/// Ties keep the temperature closest to 1. Empty input returns the identity fit.
pub fn fit_temperature(records: &[CalibrationRecord], num_bins: usize) -> NourishResult<TemperatureFit> {
    let ece_before = compute_ece(records, num_bins)?;
    let mut best = TemperatureFit {
        temperature: 1.0,
        ece_before,
        ece_after: ece_before,
        sample_count: records.len(),
    };
    if records.is_empty() {
        return Ok(best);
    }

    let degenerate = records
        .iter()
        .filter(|r| r.confidence <= 0.0 || r.confidence >= 1.0)
        .count();
    if degenerate > 0 {
        tracing::warn!(
            degenerate,
            total = records.len(),
            "Degenerate confidences clamped during temperature fit"
        );
    }

    for step in 1..=TEMPERATURE_GRID_STEPS {
        let temperature = f64::from(step) / TEMPERATURE_GRID_DIVISOR;
        let scaled = records.iter().map(|r| {
            let (c, _) = scale(r.confidence, temperature, DEFAULT_CONFIDENCE_EPSILON);
            (c, r.outcome())
        });
        let ece = ece_of(&to_curve(&accumulate(scaled, num_bins)));

        let closer_to_identity = (temperature - 1.0).abs() < (best.temperature - 1.0).abs();
        if ece < best.ece_after - f64::EPSILON
            || ((ece - best.ece_after).abs() <= f64::EPSILON && closer_to_identity)
        {
            best.temperature = temperature;
            best.ece_after = ece;
        }
    }
    Ok(best)
}

/// Summary of calibration quality over a window of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub ece: f64,
    pub mce: f64,
    pub brier: f64,
    pub sample_count: usize,
    pub curve: Vec<CalibrationBin>,
}

impl CalibrationReport {
    pub fn from_records(records: &[CalibrationRecord], num_bins: usize) -> NourishResult<Self> {
        let curve = calibration_curve(records, num_bins)?;
        Ok(Self {
            ece: ece_of(&curve),
            mce: mce_of(&curve),
            brier: brier_score(records),
            sample_count: records.len(),
            curve,
        })
    }

    /// Report with the default bin count.
    pub fn with_default_bins(records: &[CalibrationRecord]) -> NourishResult<Self> {
        Self::from_records(records, DEFAULT_CALIBRATION_BINS)
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn arb_records() -> impl Strategy<Value = Vec<CalibrationRecord>> {
        prop::collection::vec((0.0f64..=1.0, any::<bool>()), 1..200).prop_map(|rows| {
            let now = Utc::now();
            rows.into_iter()
                .map(|(c, ok)| CalibrationRecord::new(c, ok, now).unwrap())
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// ECE stays within [0, 1] for any non-empty record set.
        #[test]
        fn prop_ece_bounded(records in arb_records(), bins in 1usize..30) {
            let ece = compute_ece(&records, bins).unwrap();
            prop_assert!((0.0..=1.0 + 1e-12).contains(&ece));
            let mce = maximum_calibration_error(&records, bins).unwrap();
            prop_assert!(mce + 1e-12 >= ece);
        }

        /// Buckets whose mean confidence equals their accuracy give zero ECE.
        #[test]
        fn prop_perfect_calibration_zero_ece(groups in prop::collection::vec(0usize..5, 4)) {
            // Bin centers of 4 bins are k/8 for odd k, so 8 records with k correct match exactly.
            let now = Utc::now();
            let mut records = Vec::new();
            for (bin, repeats) in groups.iter().enumerate() {
                let correct = 2 * bin + 1;
                let confidence = correct as f64 / 8.0;
                for _ in 0..*repeats {
                    for k in 0..8 {
                        records.push(CalibrationRecord::new(confidence, k < correct, now).unwrap());
                    }
                }
            }
            let ece = compute_ece(&records, 4).unwrap();
            prop_assert!(ece.abs() < 1e-9);
        }

        /// Temperature scaling stays within [0, 1] and preserves order.
        #[test]
        fn prop_temperature_monotone(a in 0.0f64..=1.0, b in 0.0f64..=1.0, t in 0.05f64..5.0) {
            let sa = apply_temperature_scaling(a, t).unwrap();
            let sb = apply_temperature_scaling(b, t).unwrap();
            prop_assert!((0.0..=1.0).contains(&sa));
            if a < b {
                prop_assert!(sa <= sb);
            }
        }
    }
}
