// src/verify.rs

//! Verification policy engine (Trusted Resources).
//!
//! Before a run is created, every task and pipeline definition is checked
//! against the configured verification policies. A policy binds a
//! resource-name glob pattern to a set of trusted signer identities and an
//! enforcement mode. The same engine serves resource definitions and
//! artifacts, parameterized by resource kind, so policy matching logic
//! exists exactly once.
//!
//! Signatures are always checked against the *current* canonical bytes of
//! the resource; editing a signed definition invalidates its verification.

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attest::digest::sha256_hex;
use crate::config::model::{ResourceKind, ResourceSignatureConfig, VerificationSection};
use crate::errors::{EngineError, Result};
use crate::sign::{verify_signature, Signature, SignerIdentity};
use crate::types::{UnmatchedPolicy, VerificationMode};

/// Canonical bytes of a named resource definition.
///
/// Maps inside the definition are `BTreeMap`s, so the serialization is
/// stable and any body edit changes the bytes a signature must cover.
pub fn canonical_resource_bytes<T: Serialize>(
    kind: ResourceKind,
    name: &str,
    spec: &T,
) -> Result<Vec<u8>> {
    #[derive(Serialize)]
    struct CanonicalResource<'a, T> {
        kind: String,
        name: &'a str,
        spec: &'a T,
    }

    Ok(serde_json::to_vec(&CanonicalResource {
        kind: kind.to_string(),
        name,
        spec,
    })?)
}

/// Outcome of verifying one resource, recorded on the run for compliance
/// evaluation. Enforce-mode failures never produce a status; they refuse the
/// run instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Signature verified against a trusted identity of the matched policy.
    Verified { policy: String, enforced: bool },
    /// Warn-mode policy matched but verification did not pass.
    Warned { policy: String, reason: String },
    /// No policy matched; dispatch proceeded unverified.
    Unmatched,
    /// Verification is switched off.
    Skipped,
}

impl VerificationStatus {
    /// Whether this status satisfies the "verified under an Enforce policy"
    /// compliance criterion.
    pub fn verified_enforced(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Verified { enforced: true, .. }
        )
    }
}

struct CompiledPolicy {
    name: String,
    matcher: GlobMatcher,
    /// Length of the literal prefix of the pattern; longer means more
    /// specific.
    specificity: usize,
    identities: Vec<String>,
    mode: VerificationMode,
}

/// Matches resources against verification policies and checks signatures.
pub struct PolicyEngine {
    policies: Vec<CompiledPolicy>,
    mode: VerificationMode,
    unmatched: UnmatchedPolicy,
}

impl PolicyEngine {
    pub fn from_config(section: &VerificationSection) -> Result<Self> {
        let mut policies = Vec::with_capacity(section.policy.len());

        for p in &section.policy {
            let glob = Glob::new(&p.pattern).map_err(|e| {
                EngineError::Config(format!(
                    "verification policy '{}' has invalid pattern: {e}",
                    p.name
                ))
            })?;

            policies.push(CompiledPolicy {
                name: p.name.clone(),
                matcher: glob.compile_matcher(),
                specificity: literal_prefix_len(&p.pattern),
                identities: p.identities.clone(),
                mode: p.mode.unwrap_or(section.mode),
            });
        }

        Ok(Self {
            policies,
            mode: section.mode,
            unmatched: section.unmatched,
        })
    }

    /// Verify one resource before it may be dispatched.
    ///
    /// Returns the status to record, or [`EngineError::Verification`] when
    /// an Enforce policy rejects the resource (or no policy matches under
    /// default-deny). Never silently retried.
    pub fn check(
        &self,
        kind: ResourceKind,
        name: &str,
        canonical: &[u8],
        signature: Option<&ResourceSignatureConfig>,
    ) -> Result<VerificationStatus> {
        if self.mode == VerificationMode::Off {
            return Ok(VerificationStatus::Skipped);
        }

        let Some(policy) = self.most_specific_match(name) else {
            return match self.unmatched {
                UnmatchedPolicy::Allow => {
                    debug!(kind = %kind, resource = %name, "no verification policy matches; allowing");
                    Ok(VerificationStatus::Unmatched)
                }
                UnmatchedPolicy::Deny => Err(EngineError::Verification(format!(
                    "{kind} '{name}' matches no verification policy and unmatched = \"deny\""
                ))),
            };
        };

        if policy.mode == VerificationMode::Off {
            return Ok(VerificationStatus::Skipped);
        }

        match self.verify_against_policy(policy, kind, name, canonical, signature) {
            Ok(()) => Ok(VerificationStatus::Verified {
                policy: policy.name.clone(),
                enforced: policy.mode == VerificationMode::Enforce,
            }),
            Err(reason) => match policy.mode {
                VerificationMode::Enforce => Err(EngineError::Verification(format!(
                    "{kind} '{name}' rejected by policy '{}': {reason}",
                    policy.name
                ))),
                _ => {
                    warn!(
                        kind = %kind,
                        resource = %name,
                        policy = %policy.name,
                        reason = %reason,
                        "verification failed; proceeding (warn mode)"
                    );
                    Ok(VerificationStatus::Warned {
                        policy: policy.name.clone(),
                        reason,
                    })
                }
            },
        }
    }

    fn most_specific_match(&self, name: &str) -> Option<&CompiledPolicy> {
        // Longest literal prefix wins; ties go to declaration order.
        let mut best: Option<&CompiledPolicy> = None;
        for p in self.policies.iter().filter(|p| p.matcher.is_match(name)) {
            match best {
                Some(b) if p.specificity <= b.specificity => {}
                _ => best = Some(p),
            }
        }
        best
    }

    fn verify_against_policy(
        &self,
        policy: &CompiledPolicy,
        kind: ResourceKind,
        name: &str,
        canonical: &[u8],
        signature: Option<&ResourceSignatureConfig>,
    ) -> std::result::Result<(), String> {
        let Some(sig_cfg) = signature else {
            return Err("resource is unsigned".to_string());
        };

        let fingerprint = match hex::decode(&sig_cfg.public_key) {
            Ok(bytes) => sha256_hex(&bytes),
            Err(_) => return Err("signer public key is not valid hex".to_string()),
        };

        if !policy.identities.contains(&fingerprint) {
            return Err(format!(
                "signer identity {fingerprint} is not trusted by the policy"
            ));
        }

        let sig = Signature {
            payload_hash: crate::attest::digest::sha256_prefixed(canonical),
            signature: sig_cfg.signature.clone(),
            public_key: sig_cfg.public_key.clone(),
            identity: SignerIdentity::Key { fingerprint },
        };

        match verify_signature(&sig, canonical) {
            Ok(true) => {
                debug!(kind = %kind, resource = %name, policy = %policy.name, "resource verified");
                Ok(())
            }
            Ok(false) => Err("signature does not match the current resource body".to_string()),
            Err(e) => Err(format!("signature malformed: {e}")),
        }
    }
}

/// Number of leading characters in the pattern before the first glob
/// metacharacter.
fn literal_prefix_len(pattern: &str) -> usize {
    pattern
        .find(['*', '?', '[', '{'])
        .unwrap_or(pattern.len())
}
