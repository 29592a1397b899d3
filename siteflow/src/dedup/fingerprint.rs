//! Request fingerprints for telling repeats from conflicts.

use sha2::{Digest, Sha256};

use crate::core::RunKind;

/// Generates a fingerprint identifying one logical request.
///
/// Two commands with the same kind, project key, and payload (ignoring
/// surrounding whitespace) share a fingerprint.
#[must_use]
pub fn fingerprint_request(kind: RunKind, key: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(key.as_bytes());
    hasher.update(b":");
    hasher.update(payload.trim().as_bytes());
    let digest = hasher.finalize();
    format!("req:{}", hex::encode(&digest[..16]))
}
