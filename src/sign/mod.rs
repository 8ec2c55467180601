// src/sign/mod.rs

//! Attestation and resource signing.
//!
//! Two identity models sit behind one `sign` surface so callers never know
//! which is active:
//! - [`key`]: a long-lived ed25519 key loaded through the secret store;
//!   verification needs only the public key and works offline.
//! - [`keyless`]: a short-lived certificate issued by an external authority
//!   binds an ephemeral key that is discarded right after signing.
//!
//! Signing failures are non-fatal to the run; callers record them as
//! warnings so compliance evaluation can report the run as built but
//! unattested.

pub mod key;
pub mod keyless;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::attest::digest::sha256_prefixed;
use crate::config::model::SigningSection;
use crate::errors::{EngineError, Result};
use crate::types::SignerMode;

pub use key::{FileSecretStore, KeySecretStore};
pub use keyless::{HttpSigningAuthority, IdentityCertificate, SigningAuthority};

/// Who produced a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum SignerIdentity {
    /// Long-lived key, identified by the sha256 fingerprint of its verifying
    /// key.
    Key { fingerprint: String },
    /// Short-lived certificate issued by an external authority.
    Certificate {
        identity: String,
        chain: String,
        expires_at: DateTime<Utc>,
    },
}

impl SignerIdentity {
    /// The identity string matched against verification policy trust lists.
    pub fn trust_name(&self) -> &str {
        match self {
            SignerIdentity::Key { fingerprint } => fingerprint,
            SignerIdentity::Certificate { identity, .. } => identity,
        }
    }
}

/// A cryptographic signature over a serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// `sha256:<hex>` of the signed bytes.
    pub payload_hash: String,
    /// Hex-encoded ed25519 signature.
    pub signature: String,
    /// Hex-encoded ed25519 verifying key.
    pub public_key: String,
    pub identity: SignerIdentity,
}

/// Verify a signature against the *current* bytes of the object it covers.
///
/// Both the recorded payload hash and the ed25519 signature must match, so
/// any edit to the signed object invalidates prior verification.
pub fn verify_signature(sig: &Signature, payload: &[u8]) -> Result<bool> {
    if sig.payload_hash != sha256_prefixed(payload) {
        return Ok(false);
    }

    let key_bytes = decode_hex_array::<32>(&sig.public_key, "public key")?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| EngineError::Signing(format!("invalid verifying key: {e}")))?;

    let sig_bytes = decode_hex_array::<64>(&sig.signature, "signature")?;
    let dalek_sig = DalekSignature::from_bytes(&sig_bytes);

    Ok(verifying_key.verify(payload, &dalek_sig).is_ok())
}

pub(crate) fn decode_hex_array<const N: usize>(value: &str, field: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value)
        .map_err(|_| EngineError::Signing(format!("{field} is not valid hex")))?;
    let mut out = [0u8; N];
    if bytes.len() != N {
        return Err(EngineError::Signing(format!(
            "{field} has invalid length {} (expected {N} bytes)",
            bytes.len()
        )));
    }
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Signs payloads according to the configured mode.
///
/// Cheap to construct; key material is loaded under exclusive access per
/// signing operation and never cached.
pub struct Signer {
    mode: SignerMode,
    key_path: Option<String>,
    secrets: Arc<dyn KeySecretStore>,
    authority: Option<Arc<dyn SigningAuthority>>,
}

impl Signer {
    pub fn new(
        mode: SignerMode,
        key_path: Option<String>,
        secrets: Arc<dyn KeySecretStore>,
        authority: Option<Arc<dyn SigningAuthority>>,
    ) -> Self {
        Self {
            mode,
            key_path,
            secrets,
            authority,
        }
    }

    /// Build a signer from the `[signing]` section with the default
    /// file-backed secret store and HTTP authority client.
    pub fn from_config(signing: &SigningSection) -> Self {
        let authority: Option<Arc<dyn SigningAuthority>> = signing
            .authority_url
            .as_ref()
            .map(|url| {
                Arc::new(HttpSigningAuthority::new(
                    url.clone(),
                    signing.identity_provider.clone(),
                )) as Arc<dyn SigningAuthority>
            });

        Self::new(
            signing.mode,
            signing.key_path.clone(),
            Arc::new(FileSecretStore::new()),
            authority,
        )
    }

    /// Sign the payload; `Ok(None)` means signing is disabled.
    ///
    /// Errors are [`EngineError::Signing`] and must be treated as non-fatal
    /// by callers: the run stays Succeeded, marked unattested.
    pub async fn sign(&self, payload: &[u8]) -> Result<Option<Signature>> {
        match self.mode {
            SignerMode::None => {
                debug!("signing disabled; skipping");
                Ok(None)
            }
            SignerMode::Key => {
                let reference = self.key_path.as_deref().ok_or_else(|| {
                    EngineError::Signing("key mode configured without key_path".to_string())
                })?;
                let sig = key::sign_with_secret(self.secrets.as_ref(), reference, payload)?;
                Ok(Some(sig))
            }
            SignerMode::Keyless => {
                let authority = self.authority.as_ref().ok_or_else(|| {
                    EngineError::Signing(
                        "keyless mode configured without an authority".to_string(),
                    )
                })?;
                match keyless::sign_ephemeral(authority.as_ref(), payload).await {
                    Ok(sig) => Ok(Some(sig)),
                    Err(e) => {
                        // An unreachable authority degrades gracefully: the
                        // build stays green, the signature is absent.
                        warn!(error = %e, "keyless signing failed");
                        Err(e)
                    }
                }
            }
        }
    }
}
