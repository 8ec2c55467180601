// src/store/records.rs

//! Persisted record types for runs, attestations and signatures.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attest::Attestation;
use crate::config::model::{IsolationSpec, ResourceKind};
use crate::dag::{PipelineStatus, RunState};
use crate::exec::IsolationReport;
use crate::sign::Signature;
use crate::transparency::InclusionProof;
use crate::verify::VerificationStatus;

/// A structured, non-fatal problem recorded on a run.
///
/// Signing and transparency failures land here instead of failing the run;
/// the compliance evaluator aggregates them into its gap report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWarning {
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningKind {
    Attestation,
    Signing,
    Transparency,
    Isolation,
    Materials,
}

/// One execution of a pipeline. Retained indefinitely for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunRecord {
    pub id: Uuid,
    pub pipeline: String,
    pub pipeline_version: String,
    pub status: PipelineStatus,
    pub params: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Resolved pipeline-level results, populated at completion.
    pub results: BTreeMap<String, String>,
    /// Verification outcome of the pipeline definition itself.
    pub verification: VerificationStatus,
    pub warnings: Vec<RunWarning>,
}

/// One execution of a task, owned by exactly one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunRecord {
    pub id: Uuid,
    pub pipeline_run: Uuid,
    /// Pipeline name, denormalized for selector queries.
    pub pipeline: String,
    pub task: String,
    pub status: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: BTreeMap<String, String>,
    pub skip_reason: Option<String>,
    pub failure: Option<String>,
    pub isolation_requested: IsolationSpec,
    pub isolation_report: Option<IsolationReport>,
    /// Requested-but-unachieved isolation properties.
    pub violations: Vec<String>,
    pub verification: VerificationStatus,
    pub warnings: Vec<RunWarning>,
}

/// A provenance document bound to one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationRecord {
    pub id: Uuid,
    /// The task run or pipeline run this attestation describes.
    pub run_id: Uuid,
    pub pipeline_run: Uuid,
    pub subject_digest: String,
    pub document: Attestation,
    pub created_at: DateTime<Utc>,
}

/// A signature over an attestation, with its optional inclusion proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: Uuid,
    pub attestation: Uuid,
    pub pipeline_run: Uuid,
    pub signature: Signature,
    pub inclusion_proof: Option<InclusionProof>,
}

/// Snapshot of a resource definition as referenced by one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub id: Uuid,
    pub pipeline_run: Uuid,
    pub kind: ResourceKind,
    pub name: String,
    pub document: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Label/selector query over stored records.
///
/// This is the minimum query surface the compliance evaluator and audit
/// tooling need: by pipeline name, by start time, by label equality.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub pipeline: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn pipeline(name: impl Into<String>) -> Self {
        Self {
            pipeline: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn since(mut self, t: DateTime<Utc>) -> Self {
        self.since = Some(t);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches_pipeline_run(&self, record: &PipelineRunRecord) -> bool {
        if let Some(p) = &self.pipeline {
            if record.pipeline != *p {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.started_at < since {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(k, v)| record.labels.get(k) == Some(v))
    }

    pub fn matches_task_run(&self, record: &TaskRunRecord) -> bool {
        if let Some(p) = &self.pipeline {
            if record.pipeline != *p {
                return false;
            }
        }
        if let Some(since) = self.since {
            match record.started_at {
                Some(started) if started >= since => {}
                _ => return false,
            }
        }
        true
    }
}
