// src/transparency.rs

//! Transparency log recording.
//!
//! Signatures can optionally be published to an append-only log so that
//! unauthorized or hidden signing events are detectable. Submission is
//! idempotent: recording the same (payload hash, signature) pair twice
//! returns the original inclusion proof instead of creating a new entry.
//! Failures are non-fatal and reported independently of signing failures.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::attest::digest::sha256_hex;
use crate::errors::{EngineError, Result};

/// Proof that a signature is included in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Zero-based index of the entry in the log.
    pub log_index: u64,
    /// Stable identifier of the entry, derived from its content.
    pub entry_id: String,
    /// Root hash of the log chain up to and including this entry.
    pub root_hash: String,
    pub integrated_at: DateTime<Utc>,
}

/// Append-only transparency log boundary.
pub trait TransparencyWitness: Send + Sync {
    /// Record a signature over the given payload hash and return the
    /// inclusion proof. Must be idempotent per (payload hash, signature).
    fn record(&self, payload_hash: &str, signature: &str) -> Result<InclusionProof>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogEntry {
    payload_hash: String,
    signature: String,
    proof: InclusionProof,
}

/// Embedded transparency log.
///
/// Entries are chained through a running root hash. When a path is
/// configured the log is persisted as JSON lines and reloaded on startup,
/// so idempotence holds across restarts.
pub struct EmbeddedTransparencyLog {
    entries: Mutex<Vec<LogEntry>>,
    path: Option<PathBuf>,
}

impl EmbeddedTransparencyLog {
    /// In-memory log (used by tests and the memory storage mode).
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// File-backed log at the given path, loading any existing entries.
    pub fn at_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = Vec::new();

        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: LogEntry = serde_json::from_str(line)?;
                entries.push(entry);
            }
        } else if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            entries: Mutex::new(entries),
            path: Some(path),
        })
    }

    fn append_to_disk(&self, entry: &LogEntry) -> Result<()> {
        if let Some(path) = &self.path {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

impl TransparencyWitness for EmbeddedTransparencyLog {
    fn record(&self, payload_hash: &str, signature: &str) -> Result<InclusionProof> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| EngineError::Transparency("log lock poisoned".to_string()))?;

        // Resubmission returns the existing proof; no duplicate entry is
        // observable.
        if let Some(existing) = entries
            .iter()
            .find(|e| e.payload_hash == payload_hash && e.signature == signature)
        {
            debug!(
                entry_id = %existing.proof.entry_id,
                "signature already recorded; returning existing proof"
            );
            return Ok(existing.proof.clone());
        }

        let log_index = entries.len() as u64;
        let entry_id = sha256_hex(format!("{payload_hash}:{signature}").as_bytes());

        let prev_root = entries
            .last()
            .map(|e| e.proof.root_hash.clone())
            .unwrap_or_default();
        let root_hash = sha256_hex(format!("{prev_root}:{entry_id}").as_bytes());

        let proof = InclusionProof {
            log_index,
            entry_id: entry_id.clone(),
            root_hash,
            integrated_at: Utc::now(),
        };

        let entry = LogEntry {
            payload_hash: payload_hash.to_string(),
            signature: signature.to_string(),
            proof: proof.clone(),
        };

        self.append_to_disk(&entry)?;
        entries.push(entry);

        info!(log_index, entry_id = %entry_id, "recorded signature in transparency log");
        Ok(proof)
    }
}
