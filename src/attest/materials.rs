// src/attest/materials.rs

//! Source/materials resolution for attestations.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attest::digest::sha256_prefixed;
use crate::errors::{EngineError, Result};

/// A resolved source reference embedded in an attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub uri: String,
    pub digest: String,
}

/// Resolves a source reference into a content digest.
///
/// Consumed when building attestation materials; implementations may fetch
/// remote sources. The engine ships a filesystem resolver and tests use a
/// scripted fake.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, uri: &str) -> Result<Material>;
}

/// Resolver for local paths and `file://` URIs.
///
/// Files are digested by content; directories by a stable listing of
/// relative path + content digest per file.
pub struct LocalSourceResolver;

impl LocalSourceResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalSourceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceResolver for LocalSourceResolver {
    fn resolve(&self, uri: &str) -> Result<Material> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let path = Path::new(path);

        if !path.exists() {
            return Err(EngineError::Attestation(format!(
                "material source does not exist: {uri}"
            )));
        }

        let digest = if path.is_file() {
            sha256_prefixed(&fs::read(path)?)
        } else {
            digest_dir(path)?
        };

        debug!(uri = %uri, digest = %digest, "resolved material");

        Ok(Material {
            uri: uri.to_string(),
            digest,
        })
    }
}

fn digest_dir(root: &Path) -> Result<String> {
    let mut entries: Vec<(String, String)> = Vec::new();
    collect_dir(root, root, &mut entries)?;
    entries.sort();

    let mut manifest = String::new();
    for (rel, digest) in entries {
        manifest.push_str(&rel);
        manifest.push(' ');
        manifest.push_str(&digest);
        manifest.push('\n');
    }

    Ok(sha256_prefixed(manifest.as_bytes()))
}

fn collect_dir(root: &Path, dir: &Path, out: &mut Vec<(String, String)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_dir(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| {
                    EngineError::Attestation(format!("path escapes root: {}", path.display()))
                })?
                .to_string_lossy()
                .to_string();
            let digest = sha256_prefixed(&fs::read(&path)?);
            out.push((rel, digest));
        }
    }
    Ok(())
}
