//! Declared-input fingerprints for no-op detection.
//!
//! A stage's fingerprint is the SHA-256 of its declared inputs rendered as
//! canonical JSON. `serde_json` keeps object keys sorted (`Map` is a
//! `BTreeMap` without the `preserve_order` feature), so two semantically
//! identical input sets always hash the same.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A hex-encoded SHA-256 digest over a stage's declared inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of a declared-input document.
    #[must_use]
    pub fn of(inputs: &serde_json::Value) -> Self {
        let canonical = inputs.to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}
