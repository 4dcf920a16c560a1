//! Running calibration tracker over a [`CalibrationLog`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nourish_core::calibration::{apply_temperature_scaling_with_epsilon, fit_temperature};
use nourish_core::{
    CalibrationConfig, CalibrationError, CalibrationRecord, CalibrationReport, Clock,
    NourishError, NourishResult, StorageError, SystemClock, TemperatureFit, Timestamp,
};

use super::traits::CalibrationLog;

/// Records prediction outcomes and reports how well confidence tracks accuracy.
///
/// Recording never blocks the caller on storage: a failed or slow append is
/// logged and skipped. Reports read a snapshot and may lag concurrent appends.
pub struct CalibrationTracker<L: CalibrationLog> {
    log: Arc<L>,
    config: CalibrationConfig,
    clock: Arc<dyn Clock>,
    /// f64 bits of the current temperature.
    temperature: AtomicU64,
}

impl<L: CalibrationLog> CalibrationTracker<L> {
    pub fn new(log: Arc<L>, config: CalibrationConfig) -> NourishResult<Self> {
        Self::with_clock(log, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        log: Arc<L>,
        config: CalibrationConfig,
        clock: Arc<dyn Clock>,
    ) -> NourishResult<Self> {
        config.validate()?;
        let temperature = AtomicU64::new(config.temperature.to_bits());
        Ok(Self {
            log,
            config,
            clock,
            temperature,
        })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Temperature currently applied by [`recalibrate`](Self::recalibrate).
    pub fn temperature(&self) -> f64 {
        f64::from_bits(self.temperature.load(Ordering::Relaxed))
    }

    /// Replace the temperature directly.
    pub fn set_temperature(&self, temperature: f64) -> NourishResult<()> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(CalibrationError::InvalidTemperature { value: temperature }.into());
        }
        self.temperature.store(temperature.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = NourishResult<T>>,
    ) -> NourishResult<T> {
        let after = self.config.operation_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout { operation, after }.into()),
        }
    }

    /// Append one outcome.
    ///
    /// Returns `Ok(true)` when persisted and `Ok(false)` when storage failed
    /// and the record was skipped. An out-of-range confidence is an error.
    pub async fn record(&self, confidence: f64, was_correct: bool) -> NourishResult<bool> {
        let record = CalibrationRecord::new(confidence, was_correct, self.clock.now())?;
        let record_id = record.record_id;

        match self.bounded("calibration_append", self.log.append(record)).await {
            Ok(()) => Ok(true),
            Err(e @ NourishError::Storage(_)) => {
                tracing::warn!(
                    error = %e,
                    record_id = %record_id,
                    "Calibration record skipped"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn records_since(&self, since: Option<Timestamp>) -> NourishResult<Vec<CalibrationRecord>> {
        self.bounded("calibration_snapshot", self.log.snapshot(since))
            .await
    }

    /// ECE, MCE, Brier score and reliability curve over records since `since`.
    pub async fn report(&self, since: Option<Timestamp>) -> NourishResult<CalibrationReport> {
        let records = self.records_since(since).await?;
        CalibrationReport::from_records(&records, self.config.num_bins)
    }

    pub async fn compute_ece(&self, since: Option<Timestamp>) -> NourishResult<f64> {
        let records = self.records_since(since).await?;
        nourish_core::compute_ece(&records, self.config.num_bins)
    }

    /// Fit a temperature over the whole log and adopt it.
    ///
    /// An empty log leaves the current temperature in place.
    pub async fn refit_temperature(&self) -> NourishResult<TemperatureFit> {
        let records = self.records_since(None).await?;
        let fit = fit_temperature(&records, self.config.num_bins)?;

        if fit.sample_count == 0 {
            tracing::debug!("No calibration records, keeping current temperature");
            return Ok(TemperatureFit {
                temperature: self.temperature(),
                ..fit
            });
        }

        self.temperature
            .store(fit.temperature.to_bits(), Ordering::Relaxed);
        tracing::info!(
            temperature = fit.temperature,
            ece_before = fit.ece_before,
            ece_after = fit.ece_after,
            samples = fit.sample_count,
            "Calibration temperature refit"
        );
        Ok(fit)
    }

    /// Apply the current temperature to a raw confidence.
    pub fn recalibrate(&self, confidence: f64) -> NourishResult<f64> {
        apply_temperature_scaling_with_epsilon(
            confidence,
            self.temperature(),
            self.config.epsilon,
        )
    }

    /// Apply the `max_age` and `max_records` retention policy.
    pub async fn prune(&self) -> NourishResult<u64> {
        if self.config.max_age.is_none() && self.config.max_records.is_none() {
            return Ok(0);
        }
        let before = match self.config.max_age {
            Some(age) => {
                let age = chrono::Duration::from_std(age).map_err(|_| {
                    NourishError::Config(nourish_core::ConfigError::InvalidValue {
                        field: "calibration.max_age".to_string(),
                        value: format!("{:?}", age),
                        reason: "out of range".to_string(),
                    })
                })?;
                self.clock.now().checked_sub_signed(age)
            }
            None => None,
        };

        let removed = self
            .bounded("calibration_prune", self.log.prune(before, self.config.max_records))
            .await?;
        if removed > 0 {
            tracing::info!(removed, "Pruned calibration records");
        }
        Ok(removed)
    }
}
