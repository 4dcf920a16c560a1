//! NOURISH Test Utilities
//!
//! Centralized test infrastructure for the NOURISH workspace:
//! - Fault-injecting storage backends for fail-open testing
//! - Proptest generators for records, sources and cache inputs
//! - Test fixtures for common scenarios
//! - Custom assertions for NOURISH error types

// Re-export core types for convenience
pub use nourish_core::{
    CacheConfig, CacheEntry, CalibrationConfig, CalibrationRecord, Clock, Completion,
    EnsembleResult, EstimateSource, ManualClock, NourishConfig, NourishError, NourishResult,
    NutritionRecord, StorageError, Timestamp,
};
pub use nourish_storage::{
    CacheKey, CalibrationLog, CalibrationTracker, InMemoryCacheBackend, InMemoryCalibrationLog,
    ResponseCache, ResponseCacheBackend,
};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn` so fail-open paths show up in
/// test output.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// FAULT-INJECTING BACKENDS
// ============================================================================

pub mod mocks {
    //! Storage backends that fail or stall on demand.

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn unavailable() -> NourishError {
        StorageError::Unavailable {
            reason: "injected failure".to_string(),
        }
        .into()
    }

    /// Cache backend whose every operation fails.
    #[derive(Debug, Default)]
    pub struct FailingCacheBackend {
        calls: AtomicU64,
    }

    impl FailingCacheBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of backend calls attempted.
        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }

        fn fail<T>(&self) -> NourishResult<T> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(unavailable())
        }
    }

    #[async_trait]
    impl ResponseCacheBackend for FailingCacheBackend {
        async fn get(&self, _key: &str) -> NourishResult<Option<CacheEntry>> {
            self.fail()
        }

        async fn upsert(&self, _entry: CacheEntry) -> NourishResult<()> {
            self.fail()
        }

        async fn record_hit(&self, _key: &str) -> NourishResult<Option<u64>> {
            self.fail()
        }

        async fn delete(&self, _key: &str) -> NourishResult<bool> {
            self.fail()
        }

        async fn expired_keys(&self, _now: Timestamp) -> NourishResult<Vec<String>> {
            self.fail()
        }

        async fn delete_expired(&self, _keys: &[String], _now: Timestamp) -> NourishResult<u64> {
            self.fail()
        }

        async fn entry_count(&self) -> NourishResult<u64> {
            self.fail()
        }
    }

    /// Wraps another cache backend and sleeps before every call.
    #[derive(Debug)]
    pub struct SlowCacheBackend<B> {
        inner: B,
        delay: Duration,
    }

    impl<B: ResponseCacheBackend> SlowCacheBackend<B> {
        pub fn new(inner: B, delay: Duration) -> Self {
            Self { inner, delay }
        }

        pub fn inner(&self) -> &B {
            &self.inner
        }
    }

    #[async_trait]
    impl<B: ResponseCacheBackend> ResponseCacheBackend for SlowCacheBackend<B> {
        async fn get(&self, key: &str) -> NourishResult<Option<CacheEntry>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        }

        async fn upsert(&self, entry: CacheEntry) -> NourishResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.upsert(entry).await
        }

        async fn record_hit(&self, key: &str) -> NourishResult<Option<u64>> {
            tokio::time::sleep(self.delay).await;
            self.inner.record_hit(key).await
        }

        async fn delete(&self, key: &str) -> NourishResult<bool> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete(key).await
        }

        async fn expired_keys(&self, now: Timestamp) -> NourishResult<Vec<String>> {
            tokio::time::sleep(self.delay).await;
            self.inner.expired_keys(now).await
        }

        async fn delete_expired(&self, keys: &[String], now: Timestamp) -> NourishResult<u64> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete_expired(keys, now).await
        }

        async fn entry_count(&self) -> NourishResult<u64> {
            tokio::time::sleep(self.delay).await;
            self.inner.entry_count().await
        }
    }

    /// Wraps another cache backend; reads and writes pass through but
    /// `record_hit` always fails.
    #[derive(Debug)]
    pub struct HitCountFailingBackend<B> {
        inner: B,
    }

    impl<B: ResponseCacheBackend> HitCountFailingBackend<B> {
        pub fn new(inner: B) -> Self {
            Self { inner }
        }

        pub fn inner(&self) -> &B {
            &self.inner
        }
    }

    #[async_trait]
    impl<B: ResponseCacheBackend> ResponseCacheBackend for HitCountFailingBackend<B> {
        async fn get(&self, key: &str) -> NourishResult<Option<CacheEntry>> {
            self.inner.get(key).await
        }

        async fn upsert(&self, entry: CacheEntry) -> NourishResult<()> {
            self.inner.upsert(entry).await
        }

        async fn record_hit(&self, _key: &str) -> NourishResult<Option<u64>> {
            Err(unavailable())
        }

        async fn delete(&self, key: &str) -> NourishResult<bool> {
            self.inner.delete(key).await
        }

        async fn expired_keys(&self, now: Timestamp) -> NourishResult<Vec<String>> {
            self.inner.expired_keys(now).await
        }

        async fn delete_expired(&self, keys: &[String], now: Timestamp) -> NourishResult<u64> {
            self.inner.delete_expired(keys, now).await
        }

        async fn entry_count(&self) -> NourishResult<u64> {
            self.inner.entry_count().await
        }
    }

    /// Calibration log whose every operation fails.
    #[derive(Debug, Default)]
    pub struct FailingCalibrationLog;

    #[async_trait]
    impl CalibrationLog for FailingCalibrationLog {
        async fn append(&self, _record: CalibrationRecord) -> NourishResult<()> {
            Err(unavailable())
        }

        async fn snapshot(
            &self,
            _since: Option<Timestamp>,
        ) -> NourishResult<Vec<CalibrationRecord>> {
            Err(unavailable())
        }

        async fn prune(
            &self,
            _before: Option<Timestamp>,
            _keep_latest: Option<usize>,
        ) -> NourishResult<u64> {
            Err(unavailable())
        }

        async fn len(&self) -> NourishResult<usize> {
            Err(unavailable())
        }
    }

    /// Calibration log that stalls on `append` and serves reads normally.
    #[derive(Debug)]
    pub struct SlowAppendCalibrationLog<L> {
        inner: L,
        delay: Duration,
    }

    impl<L: CalibrationLog> SlowAppendCalibrationLog<L> {
        pub fn new(inner: L, delay: Duration) -> Self {
            Self { inner, delay }
        }
    }

    #[async_trait]
    impl<L: CalibrationLog> CalibrationLog for SlowAppendCalibrationLog<L> {
        async fn append(&self, record: CalibrationRecord) -> NourishResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.append(record).await
        }

        async fn snapshot(
            &self,
            since: Option<Timestamp>,
        ) -> NourishResult<Vec<CalibrationRecord>> {
            self.inner.snapshot(since).await
        }

        async fn prune(
            &self,
            before: Option<Timestamp>,
            keep_latest: Option<usize>,
        ) -> NourishResult<u64> {
            self.inner.prune(before, keep_latest).await
        }

        async fn len(&self) -> NourishResult<usize> {
            self.inner.len().await
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for NOURISH value types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-2030
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Non-negative macros with no fiber.
    pub fn arb_macros() -> impl Strategy<Value = (f64, f64, f64)> {
        (0.0f64..200.0, 0.0f64..300.0, 0.0f64..150.0)
    }

    /// A record whose calories exactly match its macros.
    pub fn arb_consistent_record() -> impl Strategy<Value = NutritionRecord> {
        arb_macros().prop_map(|(p, c, f)| NutritionRecord::new(4.0 * p + 4.0 * c + 9.0 * f, p, c, f))
    }

    /// Any well-formed record, consistent or not.
    pub fn arb_nutrition_record() -> impl Strategy<Value = NutritionRecord> {
        (0.0f64..3000.0, arb_macros(), prop::option::of(0.0f64..40.0)).prop_map(
            |(kcal, (p, c, f), fiber)| NutritionRecord {
                calories: kcal,
                protein_g: p,
                carbs_g: c,
                fat_g: f,
                fiber_g: fiber,
            },
        )
    }

    /// A record with at least one negative field.
    pub fn arb_negative_record() -> impl Strategy<Value = NutritionRecord> {
        (arb_nutrition_record(), 0usize..4, -500.0f64..-0.01).prop_map(|(mut r, field, v)| {
            match field {
                0 => r.calories = v,
                1 => r.protein_g = v,
                2 => r.carbs_g = v,
                _ => r.fat_g = v,
            }
            r
        })
    }

    /// One valid estimate source.
    pub fn arb_estimate_source() -> impl Strategy<Value = EstimateSource> {
        ("[a-z]{3,8}", 0.01f64..1.0, 0.0f64..2000.0, 0.0f64..=1.0)
            .prop_map(|(id, w, e, c)| EstimateSource::new(id, w, e, c))
    }

    /// A non-empty ensemble input.
    pub fn arb_sources() -> impl Strategy<Value = Vec<EstimateSource>> {
        prop::collection::vec(arb_estimate_source(), 1..8)
    }

    /// One calibration record.
    pub fn arb_calibration_record() -> impl Strategy<Value = CalibrationRecord> {
        (0.0f64..=1.0, any::<bool>(), arb_timestamp()).prop_map(|(confidence, was_correct, created_at)| {
            CalibrationRecord {
                record_id: uuid::Uuid::now_v7(),
                confidence,
                was_correct,
                created_at,
            }
        })
    }

    /// A non-empty batch of calibration records.
    pub fn arb_calibration_records() -> impl Strategy<Value = Vec<CalibrationRecord>> {
        prop::collection::vec(arb_calibration_record(), 1..300)
    }

    /// Raw `(query, persona, mode, intensity)` cache inputs.
    pub fn arb_cache_inputs() -> impl Strategy<Value = (String, String, String, f64)> {
        (
            "[ A-Za-z?!]{1,60}",
            "[a-z_-]{1,16}",
            prop_oneof![Just("chat".to_string()), Just("meal_plan".to_string()), Just("roast".to_string())],
            0.0f64..=1.0,
        )
    }

    /// A cacheable completion.
    pub fn arb_completion() -> impl Strategy<Value = Completion> {
        ("[a-zA-Z .]{1,200}", 1u64..4000, 0.0f64..0.5)
            .prop_map(|(text, tokens, cost)| Completion::new(text, "test-model", tokens, cost))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Configuration with short timeouts so fail-open tests finish quickly.
    pub fn fast_config() -> NourishConfig {
        NourishConfig {
            cache: CacheConfig::new()
                .with_timeout(Duration::from_millis(50))
                .with_sweep_interval(Duration::from_millis(20)),
            calibration: CalibrationConfig {
                operation_timeout: Duration::from_millis(50),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A typical generated answer.
    pub fn completion() -> Completion {
        Completion::new(
            "Aim for 25-30g of protein within two hours after training.",
            "test-model",
            312,
            0.0047,
        )
    }

    /// Cooked chicken breast, 100g: consistent macros.
    pub fn chicken_breast() -> NutritionRecord {
        NutritionRecord::new(165.0, 31.0, 0.0, 3.6)
    }

    /// A response cache over an in-memory backend with a controllable clock.
    pub fn memory_cache(
        config: CacheConfig,
    ) -> NourishResult<(ResponseCache<InMemoryCacheBackend>, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = ResponseCache::with_clock(
            Arc::new(InMemoryCacheBackend::new()),
            config,
            clock.clone(),
        )?;
        Ok((cache, clock))
    }

    /// A calibration tracker over an in-memory log with a controllable clock.
    pub fn memory_tracker(
        config: CalibrationConfig,
    ) -> NourishResult<(CalibrationTracker<InMemoryCalibrationLog>, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::starting_now());
        let tracker = CalibrationTracker::with_clock(
            Arc::new(InMemoryCalibrationLog::new()),
            config,
            clock.clone(),
        )?;
        Ok((tracker, clock))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for NOURISH results.

    use super::*;

    /// Assert two floats agree within `tolerance`.
    #[track_caller]
    pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "Expected {} ± {}, got {}",
            expected,
            tolerance,
            actual
        );
    }

    /// Assert that a NourishResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &NourishResult<T>) {
        match result {
            Err(NourishError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a NourishResult is an Ensemble error.
    #[track_caller]
    pub fn assert_ensemble_error<T: std::fmt::Debug>(result: &NourishResult<T>) {
        match result {
            Err(NourishError::Ensemble(_)) => {}
            other => panic!("Expected Ensemble error, got: {:?}", other),
        }
    }

    /// Assert that a NourishResult is a Calibration error.
    #[track_caller]
    pub fn assert_calibration_error<T: std::fmt::Debug>(result: &NourishResult<T>) {
        match result {
            Err(NourishError::Calibration(_)) => {}
            other => panic!("Expected Calibration error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
