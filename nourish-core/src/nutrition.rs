//! Energy-balance validation for nutrition records.
//!
//! A record is checked against the Atwater factors:
//! `calories ≈ 4·protein + 4·carbs + 9·fat − 2·fiber`. A record passes when
//! either the absolute or the relative tolerance holds, so very-low-calorie
//! foods are not penalised for small absolute drift.

use crate::config::ValidatorConfig;
use crate::error::{NourishResult, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// kcal per gram of protein.
pub const KCAL_PER_G_PROTEIN: f64 = 4.0;
/// kcal per gram of carbohydrate.
pub const KCAL_PER_G_CARBS: f64 = 4.0;
/// kcal per gram of fat.
pub const KCAL_PER_G_FAT: f64 = 9.0;
/// kcal subtracted per gram of fiber (net-carb adjustment).
pub const KCAL_PER_G_FIBER_ADJUSTMENT: f64 = 2.0;

/// A single food's macro breakdown as reported by an estimator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NutritionRecord {
    pub calories: f64,
    #[serde(default)]
    pub protein_g: f64,
    #[serde(default)]
    pub carbs_g: f64,
    #[serde(default)]
    pub fat_g: f64,
    #[serde(default)]
    pub fiber_g: Option<f64>,
}

impl NutritionRecord {
    pub fn new(calories: f64, protein_g: f64, carbs_g: f64, fat_g: f64) -> Self {
        Self {
            calories,
            protein_g,
            carbs_g,
            fat_g,
            fiber_g: None,
        }
    }

    pub fn with_fiber(mut self, fiber_g: f64) -> Self {
        self.fiber_g = Some(fiber_g);
        self
    }

    /// Build a record from a loosely-typed JSON object.
    ///
    /// Absent or `null` macro fields count as 0. `calories` must be present.
    /// Numeric strings are not coerced.
    pub fn from_payload(payload: &Value) -> NourishResult<Self> {
        let object = payload.as_object().ok_or_else(|| ValidationError::NotAnObject {
            kind: json_kind(payload).to_string(),
        })?;

        let field = |name: &str| -> NourishResult<Option<f64>> {
            match object.get(name) {
                None | Some(Value::Null) => Ok(None),
                Some(value) => value.as_f64().map(Some).ok_or_else(|| {
                    ValidationError::NonNumericField {
                        field: name.to_string(),
                    }
                    .into()
                }),
            }
        };

        let calories = field("calories")?.ok_or_else(|| ValidationError::MissingField {
            field: "calories".to_string(),
        })?;

        Ok(Self {
            calories,
            protein_g: field("protein_g")?.unwrap_or(0.0),
            carbs_g: field("carbs_g")?.unwrap_or(0.0),
            fat_g: field("fat_g")?.unwrap_or(0.0),
            fiber_g: field("fiber_g")?,
        })
    }

    /// `4P + 4C + 9F − 2·fiber`, dropping the fiber term if it would go negative.
    pub fn expected_calories(&self) -> f64 {
        let base = KCAL_PER_G_PROTEIN * self.protein_g
            + KCAL_PER_G_CARBS * self.carbs_g
            + KCAL_PER_G_FAT * self.fat_g;
        let fiber_term = KCAL_PER_G_FIBER_ADJUSTMENT * self.fiber_g.unwrap_or(0.0);
        if base - fiber_term < 0.0 {
            base
        } else {
            base - fiber_term
        }
    }

    fn fields(&self) -> [(&'static str, f64); 5] {
        [
            ("calories", self.calories),
            ("protein_g", self.protein_g),
            ("carbs_g", self.carbs_g),
            ("fat_g", self.fat_g),
            ("fiber_g", self.fiber_g.unwrap_or(0.0)),
        ]
    }

    fn field_value(&self, name: &str) -> f64 {
        self.fields()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map_or(f64::NAN, |(_, value)| value)
    }

    /// First field that makes the record malformed, if any.
    fn malformed_field(&self) -> Option<ValidationIssue> {
        self.fields().into_iter().find_map(|(field, value)| {
            if !value.is_finite() {
                Some(ValidationIssue::NonFinite { field })
            } else if value < 0.0 {
                Some(ValidationIssue::NegativeInput { field, value })
            } else {
                None
            }
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Why a record failed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValidationIssue {
    /// A field is negative. The record must be rejected, not corrected.
    NegativeInput { field: &'static str, value: f64 },
    /// A field is NaN or infinite.
    NonFinite { field: &'static str },
    /// Calories disagree with the macros beyond both tolerances.
    EnergyMismatch,
}

impl ValidationIssue {
    /// Malformed input has no meaningful correction.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::EnergyMismatch)
    }
}

/// Outcome of an energy-balance check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub expected_calories: f64,
    pub absolute_error: f64,
    pub relative_error: f64,
    /// `None` for malformed input. Otherwise the computed value when the
    /// deviation exceeded the correction threshold, else the original calories.
    pub corrected_calories: Option<f64>,
    pub correction_applied: bool,
    pub issue: Option<ValidationIssue>,
}

impl ValidationResult {
    /// Confidence the caller should report after acting on this result.
    ///
    /// Corrections reduce confidence in proportion to the relative error;
    /// malformed input drops it to 0.
    pub fn adjusted_confidence(&self, reported: f64) -> f64 {
        let reported = reported.clamp(0.0, 1.0);
        match &self.issue {
            Some(issue) if issue.is_malformed() => 0.0,
            _ if self.correction_applied => reported * (1.0 - self.relative_error.min(1.0)),
            _ => reported,
        }
    }

    pub fn issue(&self) -> Option<&ValidationIssue> {
        self.issue.as_ref()
    }
}

/// Pure, stateless energy-balance validator.
#[derive(Debug, Clone, Default)]
pub struct NutritionValidator {
    config: ValidatorConfig,
}

impl NutritionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with custom tolerances, rejecting invalid settings.
    pub fn with_config(config: ValidatorConfig) -> NourishResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, record: &NutritionRecord) -> ValidationResult {
        let expected_calories = record.expected_calories();
        let absolute_error = (record.calories - expected_calories).abs();
        let relative_error = absolute_error / expected_calories.max(1.0);

        if let Some(issue) = record.malformed_field() {
            return ValidationResult {
                is_valid: false,
                expected_calories,
                absolute_error,
                relative_error,
                corrected_calories: None,
                correction_applied: false,
                issue: Some(issue),
            };
        }

        let is_valid = absolute_error <= self.config.tolerance_abs_kcal
            || relative_error <= self.config.tolerance_rel;
        let correction_applied = absolute_error > self.config.correction_threshold_kcal;
        let corrected_calories = if correction_applied {
            tracing::debug!(
                reported = record.calories,
                expected = expected_calories,
                absolute_error,
                "Correcting calories to macro-derived value"
            );
            expected_calories
        } else {
            record.calories
        };

        ValidationResult {
            is_valid,
            expected_calories,
            absolute_error,
            relative_error,
            corrected_calories: Some(corrected_calories),
            correction_applied,
            issue: (!is_valid).then_some(ValidationIssue::EnergyMismatch),
        }
    }

    /// Like [`validate`](Self::validate), but malformed input is an error.
    ///
    /// Negative or non-finite fields return
    /// [`ValidationError::InvalidNutritionInput`] instead of a rejected result.
    pub fn try_validate(&self, record: &NutritionRecord) -> NourishResult<ValidationResult> {
        let result = self.validate(record);
        match result.issue {
            Some(ValidationIssue::NegativeInput { field, value }) => {
                Err(ValidationError::InvalidNutritionInput {
                    field: field.to_string(),
                    value,
                }
                .into())
            }
            Some(ValidationIssue::NonFinite { field }) => {
                Err(ValidationError::InvalidNutritionInput {
                    field: field.to_string(),
                    value: record.field_value(field),
                }
                .into())
            }
            _ => Ok(result),
        }
    }
}

/// Validate with the reference tolerances.
pub fn validate(record: &NutritionRecord) -> ValidationResult {
    NutritionValidator::new().validate(record)
}

/// [`NutritionValidator::try_validate`] with the reference tolerances.
pub fn try_validate(record: &NutritionRecord) -> NourishResult<ValidationResult> {
    NutritionValidator::new().try_validate(record)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NourishError;
    use serde_json::json;

    #[test]
    fn test_chicken_thigh_within_absolute_tolerance() {
        let record = NutritionRecord::new(220.0, 20.0, 0.0, 14.0).with_fiber(0.0);
        let result = validate(&record);

        assert_eq!(result.expected_calories, 206.0);
        assert_eq!(result.absolute_error, 14.0);
        assert!((result.relative_error - 0.068).abs() < 0.001);
        assert!(result.is_valid);
        assert_eq!(result.corrected_calories, Some(220.0));
        assert!(!result.correction_applied);
        assert!(result.issue().is_none());
    }

    #[test]
    fn test_relative_tolerance_alone_passes() {
        // 30 kcal off on ~1000 kcal: outside 20 kcal, inside 15%.
        let record = NutritionRecord::new(1030.0, 50.0, 100.0, 44.4444);
        let result = validate(&record);
        assert!(result.absolute_error > 20.0);
        assert!(result.is_valid);
    }

    #[test]
    fn test_large_error_is_corrected() {
        let record = NutritionRecord::new(300.0, 10.0, 10.0, 0.0);
        let result = validate(&record);
        assert_eq!(result.expected_calories, 80.0);
        assert!(!result.is_valid);
        assert!(result.correction_applied);
        assert_eq!(result.corrected_calories, Some(80.0));
        assert_eq!(result.issue(), Some(&ValidationIssue::EnergyMismatch));
    }

    #[test]
    fn test_moderate_error_is_not_corrected() {
        // 40 kcal off on 100 kcal: invalid, but under the correction threshold.
        let record = NutritionRecord::new(140.0, 25.0, 0.0, 0.0);
        let result = validate(&record);
        assert!(!result.is_valid);
        assert!(!result.correction_applied);
        assert_eq!(result.corrected_calories, Some(140.0));
    }

    #[test]
    fn test_negative_macro_is_rejected_without_correction() {
        let record = NutritionRecord::new(100.0, -5.0, 10.0, 2.0);
        let result = validate(&record);
        assert!(!result.is_valid);
        assert_eq!(result.corrected_calories, None);
        assert_eq!(
            result.issue(),
            Some(&ValidationIssue::NegativeInput {
                field: "protein_g",
                value: -5.0
            })
        );
    }

    #[test]
    fn test_negative_calories_is_rejected() {
        let record = NutritionRecord::new(-1.0, 0.0, 0.0, 0.0);
        let result = validate(&record);
        assert!(!result.is_valid);
        assert_eq!(result.corrected_calories, None);
    }

    #[test]
    fn test_non_finite_is_rejected() {
        let record = NutritionRecord::new(f64::NAN, 1.0, 1.0, 1.0);
        let result = validate(&record);
        assert!(!result.is_valid);
        assert_eq!(result.corrected_calories, None);
        assert_eq!(
            result.issue(),
            Some(&ValidationIssue::NonFinite { field: "calories" })
        );
    }

    #[test]
    fn test_fiber_is_subtracted() {
        let record = NutritionRecord::new(0.0, 0.0, 20.0, 0.0).with_fiber(5.0);
        assert_eq!(record.expected_calories(), 70.0);
    }

    #[test]
    fn test_fiber_term_dropped_when_it_would_go_negative() {
        let record = NutritionRecord::new(0.0, 1.0, 0.0, 0.0).with_fiber(10.0);
        assert_eq!(record.expected_calories(), 4.0);
    }

    #[test]
    fn test_relative_error_floor_for_zero_expected() {
        let record = NutritionRecord::new(10.0, 0.0, 0.0, 0.0);
        let result = validate(&record);
        assert_eq!(result.relative_error, 10.0);
        assert!(result.is_valid); // within 20 kcal
    }

    #[test]
    fn test_adjusted_confidence() {
        let corrected = validate(&NutritionRecord::new(300.0, 10.0, 10.0, 0.0));
        // relative error > 1 caps the reduction at 100%.
        assert_eq!(corrected.adjusted_confidence(0.9), 0.0);

        let corrected = validate(&NutritionRecord::new(700.0, 50.0, 50.0, 20.0));
        // expected 580, error 120, relative ~0.207
        let adjusted = corrected.adjusted_confidence(0.8);
        assert!((adjusted - 0.8 * (1.0 - 120.0 / 580.0)).abs() < 1e-9);

        let untouched = validate(&NutritionRecord::new(220.0, 20.0, 0.0, 14.0));
        assert_eq!(untouched.adjusted_confidence(0.8), 0.8);

        let malformed = validate(&NutritionRecord::new(100.0, -1.0, 0.0, 0.0));
        assert_eq!(malformed.adjusted_confidence(0.8), 0.0);
    }

    #[test]
    fn test_custom_tolerances() {
        let validator = NutritionValidator::with_config(ValidatorConfig {
            tolerance_abs_kcal: 5.0,
            tolerance_rel: 0.01,
            correction_threshold_kcal: 10.0,
        })
        .unwrap();
        let result = validator.validate(&NutritionRecord::new(220.0, 20.0, 0.0, 14.0));
        assert!(!result.is_valid);
        assert!(result.correction_applied);
        assert_eq!(result.corrected_calories, Some(206.0));
    }

    #[test]
    fn test_invalid_tolerances_rejected() {
        let result = NutritionValidator::with_config(ValidatorConfig {
            tolerance_rel: 2.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(NourishError::Config(_))));
    }

    #[test]
    fn test_try_validate_surfaces_malformed_input() {
        let negative = try_validate(&NutritionRecord::new(100.0, 10.0, -4.0, 2.0));
        assert!(matches!(
            negative,
            Err(NourishError::Validation(ValidationError::InvalidNutritionInput { field, value }))
                if field == "carbs_g" && value == -4.0
        ));

        let infinite = try_validate(&NutritionRecord::new(100.0, 10.0, 4.0, 2.0).with_fiber(f64::INFINITY));
        assert!(matches!(
            infinite,
            Err(NourishError::Validation(ValidationError::InvalidNutritionInput { field, .. }))
                if field == "fiber_g"
        ));

        // A mismatch is still a result, not an error.
        let mismatch = try_validate(&NutritionRecord::new(300.0, 10.0, 10.0, 0.0)).unwrap();
        assert!(!mismatch.is_valid);
        assert_eq!(mismatch.corrected_calories, Some(80.0));
    }

    #[test]
    fn test_from_payload_defaults_missing_macros() {
        let record = NutritionRecord::from_payload(&json!({
            "calories": 120,
            "protein_g": 30.0,
            "fat_g": null
        }))
        .unwrap();
        assert_eq!(record.calories, 120.0);
        assert_eq!(record.protein_g, 30.0);
        assert_eq!(record.carbs_g, 0.0);
        assert_eq!(record.fat_g, 0.0);
        assert_eq!(record.fiber_g, None);
    }

    #[test]
    fn test_from_payload_rejects_non_numeric() {
        let result = NutritionRecord::from_payload(&json!({
            "calories": 120,
            "carbs_g": "lots"
        }));
        assert!(matches!(
            result,
            Err(NourishError::Validation(ValidationError::NonNumericField { field })) if field == "carbs_g"
        ));
    }

    #[test]
    fn test_from_payload_requires_calories() {
        let result = NutritionRecord::from_payload(&json!({ "protein_g": 3 }));
        assert!(matches!(
            result,
            Err(NourishError::Validation(ValidationError::MissingField { .. }))
        ));
    }

    #[test]
    fn test_from_payload_rejects_non_object() {
        let result = NutritionRecord::from_payload(&json!([1, 2, 3]));
        assert!(matches!(
            result,
            Err(NourishError::Validation(ValidationError::NotAnObject { kind })) if kind == "array"
        ));
    }

    #[test]
    fn test_serde_defaults_missing_macros() {
        let record: NutritionRecord = serde_json::from_str(r#"{"calories": 50}"#).unwrap();
        assert_eq!(record, NutritionRecord::new(50.0, 0.0, 0.0, 0.0));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Calories equal to the computed value always validate with zero error.
        #[test]
        fn prop_exact_calories_validate(
            protein in 0.0f64..200.0,
            carbs in 0.0f64..400.0,
            fat in 0.0f64..150.0,
            fiber in 0.0f64..60.0,
        ) {
            let mut record = NutritionRecord::new(0.0, protein, carbs, fat).with_fiber(fiber);
            record.calories = record.expected_calories();
            let result = validate(&record);
            prop_assert!(result.is_valid);
            prop_assert_eq!(result.absolute_error, 0.0);
            prop_assert_eq!(result.corrected_calories, Some(record.calories));
        }

        /// A 100 kcal overshoot on a small food is rejected and corrected back.
        #[test]
        fn prop_large_overshoot_is_corrected(
            protein in 0.0f64..40.0,
            carbs in 0.0f64..40.0,
            fat in 0.0f64..20.0,
        ) {
            // expected <= 500, so 100 kcal is above the 15% ceiling.
            let mut record = NutritionRecord::new(0.0, protein, carbs, fat);
            let expected = record.expected_calories();
            record.calories = expected + 100.0;
            let result = validate(&record);
            prop_assert!(!result.is_valid);
            prop_assert_eq!(result.corrected_calories, Some(expected));
        }

        /// Any negative macro is rejected with no correction offered.
        #[test]
        fn prop_negative_input_never_corrected(
            calories in 0.0f64..1000.0,
            negative in -500.0f64..-0.001,
        ) {
            let record = NutritionRecord::new(calories, 10.0, negative, 5.0);
            let result = validate(&record);
            prop_assert!(!result.is_valid);
            prop_assert!(result.corrected_calories.is_none());
        }

        /// Adjusted confidence never exceeds the reported confidence.
        #[test]
        fn prop_adjusted_confidence_never_increases(
            calories in 0.0f64..2000.0,
            protein in 0.0f64..100.0,
            carbs in 0.0f64..200.0,
            fat in 0.0f64..80.0,
            reported in 0.0f64..=1.0,
        ) {
            let result = validate(&NutritionRecord::new(calories, protein, carbs, fat));
            let adjusted = result.adjusted_confidence(reported);
            prop_assert!(adjusted <= reported);
            prop_assert!(adjusted >= 0.0);
        }
    }
}
