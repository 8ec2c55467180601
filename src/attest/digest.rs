// src/attest/digest.rs

//! Content digest helpers shared by attestation, signing and verification.

use sha2::{Digest, Sha256};

/// sha256 of the payload, hex encoded.
pub fn sha256_hex(payload: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(payload);
    hex::encode(h.finalize())
}

/// sha256 of the payload in the `sha256:<hex>` form used for subject and
/// material digests.
pub fn sha256_prefixed(payload: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(payload))
}
