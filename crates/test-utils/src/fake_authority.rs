use std::future::Future;
use std::pin::Pin;

use chrono::{Duration, Utc};
use gantry::errors::{EngineError, Result};
use gantry::sign::{IdentityCertificate, SigningAuthority};

/// Authority that instantly issues a short-lived certificate for a fixed
/// identity.
pub struct FakeAuthority {
    pub identity: String,
}

impl FakeAuthority {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
        }
    }
}

impl SigningAuthority for FakeAuthority {
    fn issue_certificate(
        &self,
        _identity_token: &str,
        public_key_hex: &str,
    ) -> Pin<Box<dyn Future<Output = Result<IdentityCertificate>> + Send + '_>> {
        let identity = self.identity.clone();
        let public_key = public_key_hex.to_string();

        Box::pin(async move {
            Ok(IdentityCertificate {
                identity,
                certificate: format!("fake-cert:{public_key}"),
                expires_at: Utc::now() + Duration::minutes(10),
            })
        })
    }
}

/// Authority that is never reachable; keyless signing must degrade
/// gracefully against it.
pub struct UnreachableAuthority;

impl SigningAuthority for UnreachableAuthority {
    fn issue_certificate(
        &self,
        _identity_token: &str,
        _public_key_hex: &str,
    ) -> Pin<Box<dyn Future<Output = Result<IdentityCertificate>> + Send + '_>> {
        Box::pin(async move {
            Err(EngineError::Signing(
                "signing authority unreachable: connection refused".to_string(),
            ))
        })
    }
}
