// src/attest/provenance.rs

//! Provenance documents and their generator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attest::materials::Material;
use crate::errors::Result;

/// An artifact the attestation speaks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    /// Content digest in `sha256:<hex>` form.
    pub digest: String,
}

/// What was executed to produce the subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub pipeline: String,
    pub pipeline_version: String,
    /// Task name for task-run attestations; absent for the pipeline-level
    /// attestation.
    pub task: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

/// A provenance document describing one Succeeded run.
///
/// Immutable once created, and deterministic: every field is derived from
/// the run's recorded inputs, so regenerating from the same record yields
/// byte-identical canonical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub version: String,
    pub subject: Vec<Subject>,
    /// Identity of the execution substrate that performed the build.
    pub builder_id: String,
    pub invocation: Invocation,
    /// Resolved source references and their digests.
    pub materials: Vec<Material>,
    /// Realized result values of the run.
    pub byproducts: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Attestation {
    /// The serialized form signatures cover. Maps are `BTreeMap`s and field
    /// order is fixed, so this is stable for identical inputs.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Builds provenance documents for completed runs.
#[derive(Debug, Clone)]
pub struct AttestationGenerator {
    builder_id: String,
    version: String,
}

impl AttestationGenerator {
    pub fn new(builder_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            builder_id: builder_id.into(),
            version: version.into(),
        }
    }

    /// Assemble the provenance document for one Succeeded run.
    ///
    /// Callers only invoke this for Succeeded runs; Failed and Cancelled
    /// runs never get an attestation.
    pub fn generate(
        &self,
        invocation: Invocation,
        subject: Vec<Subject>,
        materials: Vec<Material>,
        byproducts: BTreeMap<String, String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Attestation {
        Attestation {
            version: self.version.clone(),
            subject,
            builder_id: self.builder_id.clone(),
            invocation,
            materials,
            byproducts,
            started_at,
            finished_at,
        }
    }
}
