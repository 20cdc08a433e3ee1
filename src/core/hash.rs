//! Projection Hashing
//!
//! Provides deterministic hashing of the engine projection for:
//! - Determinism checks between two independent replays
//! - Dump verification after an import
//! - Compact fingerprints in logs

use serde::Serialize;
use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for engine state.
///
/// Wraps SHA-256 with a domain separator. Order of updates is critical for
/// determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for a dynamics projection.
    pub fn for_projection() -> Self {
        Self::new(b"LUPUS_PROJECTION_V1")
    }

    /// Create hasher for an event history.
    pub fn for_history() -> Self {
        Self::new(b"LUPUS_HISTORY_V1")
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with the canonical bincode encoding of a value.
    ///
    /// Every hashed type iterates in a fixed order (Vec or BTreeMap), so the
    /// encoding is stable across runs.
    pub fn update_encoded<T: Serialize>(&mut self, value: &T) -> Result<(), bincode::Error> {
        let bytes = bincode::serialize(value)?;
        self.update_u64(bytes.len() as u64);
        self.hasher.update(&bytes);
        Ok(())
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Short hex fingerprint of a hash, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..8])
}

// =============================================================================
// TESTS
// =============================================================================
