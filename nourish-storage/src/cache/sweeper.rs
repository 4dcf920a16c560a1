//! Cache Sweep Background Task
//!
//! Periodically deletes cache entries whose `expires_at` has passed. Expired
//! entries are already invisible to readers, so the sweep only reclaims
//! space and is kept off the request path.
//!
//! # Configuration
//!
//! ```rust
//! use nourish_storage::cache::SweepConfig;
//! use std::time::Duration;
//!
//! let config = SweepConfig {
//!     interval: Duration::from_secs(24 * 60 * 60), // Daily
//!     log_empty_cycles: false,
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nourish_core::{CacheConfig, DEFAULT_SWEEP_INTERVAL_SECS};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::response_cache::ResponseCache;
use super::traits::ResponseCacheBackend;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the sweep task.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often to sweep (default: 24 hours)
    pub interval: Duration,

    /// Log cycles that removed nothing at info instead of trace
    pub log_empty_cycles: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            log_empty_cycles: false,
        }
    }
}

impl SweepConfig {
    /// Take the interval from a cache configuration.
    pub fn from_cache_config(config: &CacheConfig) -> Self {
        Self {
            interval: config.sweep_interval,
            ..Self::default()
        }
    }

    /// Short interval for development/testing.
    pub fn development() -> Self {
        Self {
            interval: Duration::from_secs(10),
            log_empty_cycles: true,
        }
    }

    /// Daily sweep.
    pub fn production() -> Self {
        Self::default()
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweep activity since startup.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Total sweep cycles completed
    pub sweep_cycles: AtomicU64,

    /// Total entries removed
    pub entries_removed: AtomicU64,

    /// Total failed sweeps
    pub sweep_errors: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub sweep_cycles: u64,
    pub entries_removed: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that sweeps expired cache entries until shutdown.
///
/// The first sweep runs immediately; later ones follow `config.interval`.
/// Missed ticks are skipped rather than bunched.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cache_sweep_task(cache.clone(), SweepConfig::default(), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cache_sweep_task<B>(
    cache: Arc<ResponseCache<B>>,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics>
where
    B: ResponseCacheBackend + 'static,
{
    let metrics = Arc::new(SweepMetrics::new());

    let mut sweep_interval = interval(config.interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        batch_size = cache.config().sweep_batch_size,
        "Cache sweep task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Cache sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_once(&cache, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        entries_removed = snapshot.entries_removed,
        sweep_errors = snapshot.sweep_errors,
        "Cache sweep task completed"
    );

    metrics
}

/// Perform one sweep cycle.
async fn sweep_once<B: ResponseCacheBackend>(
    cache: &ResponseCache<B>,
    config: &SweepConfig,
    metrics: &SweepMetrics,
) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    match cache.sweep_expired().await {
        Ok(0) if config.log_empty_cycles => {
            tracing::info!("Cache sweep cycle completed with no expired entries");
        }
        Ok(0) => {
            tracing::trace!("Cache sweep cycle completed with no expired entries");
        }
        Ok(removed) => {
            metrics.entries_removed.fetch_add(removed, Ordering::Relaxed);
            tracing::info!(removed, "Cache sweep cycle completed");
        }
        Err(e) => {
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Cache sweep failed");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
