// src/sign/keyless.rs

//! Keyless signing with a short-lived, authority-issued identity.
//!
//! Flow: generate an ephemeral ed25519 key, present the ambient workload
//! identity token plus the ephemeral public key to the signing authority,
//! receive a short-lived certificate binding the two, sign, and drop the
//! private key. Verification trusts the certificate identity rather than a
//! long-lived key.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer as _, SigningKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::attest::digest::sha256_prefixed;
use crate::errors::{EngineError, Result};
use crate::sign::{Signature, SignerIdentity};

/// Environment variable holding the ambient workload identity token.
pub const IDENTITY_TOKEN_ENV: &str = "GANTRY_ID_TOKEN";

/// A short-lived certificate issued by the signing authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityCertificate {
    /// Verified identity the authority attested (e.g. a service account).
    pub identity: String,
    /// Certificate chain in the authority's encoding.
    pub certificate: String,
    pub expires_at: DateTime<Utc>,
}

/// Certificate authority boundary for keyless signing.
///
/// Production uses [`HttpSigningAuthority`]; tests script their own
/// implementation, including unreachable ones.
pub trait SigningAuthority: Send + Sync {
    /// Exchange an identity token and an ephemeral public key for a
    /// short-lived certificate binding the two.
    fn issue_certificate(
        &self,
        identity_token: &str,
        public_key_hex: &str,
    ) -> Pin<Box<dyn Future<Output = Result<IdentityCertificate>> + Send + '_>>;
}

/// HTTP client for a certificate-issuing authority.
pub struct HttpSigningAuthority {
    url: String,
    identity_provider: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CertificateRequest<'a> {
    identity_token: &'a str,
    public_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity_provider: Option<&'a str>,
}

impl HttpSigningAuthority {
    pub fn new(url: String, identity_provider: Option<String>) -> Self {
        Self {
            url,
            identity_provider,
            client: reqwest::Client::new(),
        }
    }
}

impl SigningAuthority for HttpSigningAuthority {
    fn issue_certificate(
        &self,
        identity_token: &str,
        public_key_hex: &str,
    ) -> Pin<Box<dyn Future<Output = Result<IdentityCertificate>> + Send + '_>> {
        let request = CertificateRequest {
            identity_token,
            public_key: public_key_hex,
            identity_provider: self.identity_provider.as_deref(),
        };
        let call = self.client.post(&self.url).json(&request).send();

        Box::pin(async move {
            let response = call.await.map_err(|e| {
                EngineError::Signing(format!("signing authority unreachable: {e}"))
            })?;

            if !response.status().is_success() {
                return Err(EngineError::Signing(format!(
                    "signing authority rejected the request: HTTP {}",
                    response.status()
                )));
            }

            let cert: IdentityCertificate = response.json().await.map_err(|e| {
                EngineError::Signing(format!("invalid authority response: {e}"))
            })?;

            debug!(identity = %cert.identity, "received short-lived certificate");
            Ok(cert)
        })
    }
}

/// Sign a payload with an ephemeral key bound to an authority-issued
/// certificate. The private key goes out of scope as soon as this returns.
pub async fn sign_ephemeral(
    authority: &dyn SigningAuthority,
    payload: &[u8],
) -> Result<Signature> {
    let token = ambient_identity_token()?;

    let mut seed = [0u8; 32];
    getrandom::getrandom(&mut seed)
        .map_err(|_| EngineError::Signing("ephemeral key generation failed".to_string()))?;
    let signing_key = SigningKey::from_bytes(&seed);
    seed.fill(0);

    let verifying_key = signing_key.verifying_key();
    let public_key_hex = hex::encode(verifying_key.as_bytes());

    let cert = authority
        .issue_certificate(&token, &public_key_hex)
        .await?;

    if cert.expires_at <= Utc::now() {
        return Err(EngineError::Signing(
            "authority issued an already-expired certificate".to_string(),
        ));
    }

    let sig = signing_key.sign(payload);

    info!(
        identity = %cert.identity,
        expires_at = %cert.expires_at,
        "signed payload with ephemeral certificate-bound key"
    );

    Ok(Signature {
        payload_hash: sha256_prefixed(payload),
        signature: hex::encode(sig.to_bytes()),
        public_key: public_key_hex,
        identity: SignerIdentity::Certificate {
            identity: cert.identity,
            chain: cert.certificate,
            expires_at: cert.expires_at,
        },
    })
}

fn ambient_identity_token() -> Result<String> {
    std::env::var(IDENTITY_TOKEN_ENV).map_err(|_| {
        EngineError::Signing(format!(
            "no ambient identity token in {IDENTITY_TOKEN_ENV}"
        ))
    })
}
