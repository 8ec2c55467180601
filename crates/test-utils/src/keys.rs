use std::path::{Path, PathBuf};

use ed25519_dalek::{Signer as _, SigningKey};
use gantry::config::{ResourceKind, ResourceSignatureConfig};
use gantry::sign::key::key_fingerprint;
use gantry::verify::canonical_resource_bytes;
use serde::Serialize;

/// Generate a fresh ed25519 signing key.
pub fn generate_signing_key() -> SigningKey {
    let mut seed = [0u8; 32];
    getrandom::getrandom(&mut seed).expect("random keygen failed");
    SigningKey::from_bytes(&seed)
}

/// Generate a key and write its raw 32 bytes under `dir`, as the
/// file-backed secret store expects. Returns the key and its path.
pub fn write_signing_key(dir: &Path) -> (SigningKey, PathBuf) {
    let key = generate_signing_key();
    let path = dir.join("signing.key");
    std::fs::write(&path, key.to_bytes()).expect("write signing key");
    (key, path)
}

/// Trust-list identity (sha256 fingerprint) of a signing key.
pub fn fingerprint(key: &SigningKey) -> String {
    key_fingerprint(&key.verifying_key())
}

/// Produce a detached `[[signature]]` entry over a resource definition's
/// canonical bytes.
pub fn sign_resource<T: Serialize>(
    kind: ResourceKind,
    name: &str,
    spec: &T,
    key: &SigningKey,
) -> ResourceSignatureConfig {
    let canonical =
        canonical_resource_bytes(kind, name, spec).expect("canonicalize resource");
    let sig = key.sign(&canonical);

    ResourceSignatureConfig {
        resource: name.to_string(),
        kind,
        signature: hex::encode(sig.to_bytes()),
        public_key: hex::encode(key.verifying_key().as_bytes()),
        certificate: None,
    }
}
