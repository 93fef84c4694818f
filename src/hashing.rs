//! Hashing System - SHA-256 Rule Fingerprints
//!
//! A rule's fingerprint is the hex SHA-256 of its exact body bytes.
//! Mismatches mean the body changed after the fingerprint was recorded.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::Rule;

/// Compute SHA-256 hash of bytes, return lowercase hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Fingerprint of a rule body as it would be stored
pub fn compute_fingerprint(body: &str) -> String {
    sha256_hex(body.as_bytes())
}

/// Check a rule body against its stored fingerprint.
///
/// Stored values are compared trimmed and case-insensitively, since the
/// store may hold uppercase hex or a trailing newline from manual edits.
pub fn verify(body: &str, stored_fingerprint: &str) -> bool {
    compute_fingerprint(body).eq_ignore_ascii_case(stored_fingerprint.trim())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintMismatch {
    pub rule_id: i64,
    pub rule_name: String,
    pub stored: String,
    pub computed: String,
}

/// Verify every rule of a rule set, returning one entry per mismatch in set order
pub fn verify_rule_set(rules: &[Rule]) -> Vec<FingerprintMismatch> {
    rules
        .iter()
        .filter(|rule| !verify(&rule.body, &rule.fingerprint))
        .map(|rule| FingerprintMismatch {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            stored: rule.fingerprint.clone(),
            computed: compute_fingerprint(&rule.body),
        })
        .collect()
}

// We need hex encoding
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
