//! Seed Hashing
//!
//! SHA-256 helpers for the server seed commitment.
//!
//! The commitment is the plain SHA-256 of the seed string's UTF-8 bytes,
//! hex encoded in lowercase, so anyone can recompute it with a stock tool
//! (`printf %s "$SEED" | sha256sum`). No domain separator is mixed in.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type SeedHash = [u8; 32];

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> SeedHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of a seed string, as lowercase hex.
pub fn sha256_hex(seed: &str) -> String {
    hex::encode(hash_bytes(seed.as_bytes()))
}

/// Check a revealed seed against a published hex commitment.
///
/// Accepts upper- or lowercase hex in `expected_hex`. Comparison runs over
/// every byte so timing does not depend on where the first difference is.
pub fn matches_commitment(seed: &str, expected_hex: &str) -> bool {
    let expected = match hex::decode(expected_hex) {
        Ok(bytes) if bytes.len() == 32 => bytes,
        _ => return false,
    };

    let computed = hash_bytes(seed.as_bytes());
    computed
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

// =============================================================================
// TESTS
// =============================================================================
