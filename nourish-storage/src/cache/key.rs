//! Cache key fingerprinting.
//!
//! A `CacheKey` can only be built through [`CacheKey::new`], which applies the
//! normalization rules. Two requests map to the same entry if and only if their
//! normalized query, persona, mode, and intensity are all equal.

use sha2::{Digest, Sha256};

/// Canonical bit pattern for every NaN intensity.
const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

/// Normalized request inputs and their fingerprint.
///
/// # Normalization
///
/// - query text: trimmed and lowercased
/// - persona id and mode: exact match, no normalization
/// - intensity: `-0.0` is folded into `0.0`, all NaNs share one value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    query: String,
    persona_id: String,
    mode: String,
    intensity_bits: u64,
}

impl CacheKey {
    pub fn new(
        query_text: &str,
        persona_id: impl Into<String>,
        mode: impl Into<String>,
        intensity: f64,
    ) -> Self {
        Self {
            inner: CacheKeyInner {
                query: normalize_query(query_text),
                persona_id: persona_id.into(),
                mode: mode.into(),
                intensity_bits: normalize_intensity(intensity),
            },
        }
    }

    pub fn query(&self) -> &str {
        &self.inner.query
    }

    pub fn persona_id(&self) -> &str {
        &self.inner.persona_id
    }

    pub fn mode(&self) -> &str {
        &self.inner.mode
    }

    pub fn intensity(&self) -> f64 {
        f64::from_bits(self.inner.intensity_bits)
    }

    /// Raw SHA-256 digest.
    ///
    /// Each string field is prefixed with its length as a little-endian u64 so
    /// `("ab", "c")` and `("a", "bc")` hash differently.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for field in [&self.inner.query, &self.inner.persona_id, &self.inner.mode] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(self.inner.intensity_bits.to_le_bytes());
        hasher.finalize().into()
    }

    /// Hex-encoded digest. Used as the storage key.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.digest())
    }
}

fn normalize_query(query_text: &str) -> String {
    query_text.trim().to_lowercase()
}

fn normalize_intensity(intensity: f64) -> u64 {
    if intensity.is_nan() {
        CANONICAL_NAN_BITS
    } else if intensity == 0.0 {
        0.0f64.to_bits()
    } else {
        intensity.to_bits()
    }
}

// ============================================================================
// TESTS
// ============================================================================
