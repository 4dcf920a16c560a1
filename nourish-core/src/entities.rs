//! Persisted entities.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// A cached AI response, owned by the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint of the normalized request inputs.
    pub key: String,
    pub response_text: String,
    pub model_used: String,
    pub tokens_used: u64,
    pub cost_units: f64,
    /// Incremented on every hit.
    pub hit_count: u64,
    pub created_at: Timestamp,
    /// Always later than `created_at`.
    pub expires_at: Timestamp,
}

impl CacheEntry {
    /// An entry is expired from the instant `now` reaches `expires_at`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// The sweep only removes entries strictly past their expiry.
    pub fn is_sweepable_at(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }
}

/// Output of a generator call the cache stores on a miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub tokens_used: u64,
    pub cost_units: f64,
}

impl Completion {
    pub fn new(
        text: impl Into<String>,
        model: impl Into<String>,
        tokens_used: u64,
        cost_units: f64,
    ) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            tokens_used,
            cost_units,
        }
    }
}
