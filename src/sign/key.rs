// src/sign/key.rs

//! Key-based signing with a long-lived ed25519 key.

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use tracing::debug;

use crate::attest::digest::{sha256_hex, sha256_prefixed};
use crate::errors::{EngineError, Result};
use crate::sign::{Signature, SignerIdentity};

/// Scoped access to private key material.
///
/// Only the signer component holds a secret store; key bytes never travel
/// through any other part of the engine.
pub trait KeySecretStore: Send + Sync {
    /// Load the raw key bytes for a secret reference.
    fn load(&self, secret_ref: &str) -> Result<Vec<u8>>;
}

/// Secret store reading raw 32-byte ed25519 keys from the filesystem.
pub struct FileSecretStore;

impl FileSecretStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySecretStore for FileSecretStore {
    fn load(&self, secret_ref: &str) -> Result<Vec<u8>> {
        let path = Path::new(secret_ref);
        if !path.exists() {
            return Err(EngineError::Signing(format!(
                "signing key not found: {secret_ref}"
            )));
        }
        Ok(fs::read(path)?)
    }
}

/// sha256 fingerprint of a verifying key, used as the signer identity for
/// key-based signatures.
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    sha256_hex(key.as_bytes())
}

/// Load the key from the secret store and sign the payload.
///
/// The key material lives only for the duration of this call.
pub fn sign_with_secret(
    secrets: &dyn KeySecretStore,
    secret_ref: &str,
    payload: &[u8],
) -> Result<Signature> {
    let bytes = secrets.load(secret_ref)?;
    if bytes.len() != 32 {
        return Err(EngineError::Signing(format!(
            "signing key has invalid length {} (expected 32 bytes)",
            bytes.len()
        )));
    }

    let mut sk = [0u8; 32];
    sk.copy_from_slice(&bytes);
    let signing_key = SigningKey::from_bytes(&sk);

    let signature = sign_payload(&signing_key, payload);
    debug!(
        fingerprint = %signature.identity.trust_name(),
        "signed payload with long-lived key"
    );
    Ok(signature)
}

/// Sign a payload with an in-memory key, producing a key-identity signature.
pub fn sign_payload(signing_key: &SigningKey, payload: &[u8]) -> Signature {
    let verifying_key = signing_key.verifying_key();
    let sig = signing_key.sign(payload);

    Signature {
        payload_hash: sha256_prefixed(payload),
        signature: hex::encode(sig.to_bytes()),
        public_key: hex::encode(verifying_key.as_bytes()),
        identity: SignerIdentity::Key {
            fingerprint: key_fingerprint(&verifying_key),
        },
    }
}
