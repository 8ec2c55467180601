// src/attest/registry.rs

//! Artifact registry boundary.

use crate::attest::digest::sha256_prefixed;
use crate::errors::Result;

/// Registers produced artifacts and returns their content digest, which
/// becomes the attestation subject.
pub trait ArtifactRegistry: Send + Sync {
    fn register(&self, name: &str, manifest: &[u8]) -> Result<String>;
}

/// Content-addressing registry with no remote side: the digest *is* the
/// registration.
pub struct LocalArtifactRegistry;

impl LocalArtifactRegistry {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactRegistry for LocalArtifactRegistry {
    fn register(&self, _name: &str, manifest: &[u8]) -> Result<String> {
        Ok(sha256_prefixed(manifest))
    }
}
