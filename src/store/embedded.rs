// src/store/embedded.rs

//! Embedded file-backed run store.
//!
//! Records are JSON documents under the storage root:
//!
//! ```text
//! <root>/store/
//!   pipeline_runs/<id>.json
//!   task_runs/<id>.json
//!   attestations/<id>.json
//!   signatures/<id>.json
//!   definitions/<id>.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::store::records::{
    AttestationRecord, DefinitionRecord, PipelineRunRecord, Selector, SignatureRecord,
    TaskRunRecord,
};
use crate::store::RunStore;

const PIPELINE_RUNS: &str = "pipeline_runs";
const TASK_RUNS: &str = "task_runs";
const ATTESTATIONS: &str = "attestations";
const SIGNATURES: &str = "signatures";
const DEFINITIONS: &str = "definitions";

pub struct EmbeddedStore {
    root: PathBuf,
}

impl EmbeddedStore {
    /// Open (creating if needed) an embedded store under the given root.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().join("store");
        for kind in [PIPELINE_RUNS, TASK_RUNS, ATTESTATIONS, SIGNATURES, DEFINITIONS] {
            fs::create_dir_all(root.join(kind))?;
        }
        Ok(Self { root })
    }

    fn path_for(&self, kind: &str, id: Uuid) -> PathBuf {
        self.root.join(kind).join(format!("{id}.json"))
    }

    fn write<T: Serialize>(&self, kind: &str, id: Uuid, record: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        fs::write(self.path_for(kind, id), bytes)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, kind: &str, id: Uuid) -> Result<Option<T>> {
        let path = self.path_for(kind, id);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn read_all<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.root.join(kind))? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                let bytes = fs::read(&path)?;
                out.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(out)
    }
}

impl RunStore for EmbeddedStore {
    fn put_pipeline_run(&self, record: &PipelineRunRecord) -> Result<()> {
        self.write(PIPELINE_RUNS, record.id, record)
    }

    fn get_pipeline_run(&self, id: Uuid) -> Result<Option<PipelineRunRecord>> {
        self.read(PIPELINE_RUNS, id)
    }

    fn list_pipeline_runs(&self, selector: &Selector) -> Result<Vec<PipelineRunRecord>> {
        let mut runs: Vec<PipelineRunRecord> = self
            .read_all::<PipelineRunRecord>(PIPELINE_RUNS)?
            .into_iter()
            .filter(|r| selector.matches_pipeline_run(r))
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    fn put_task_run(&self, record: &TaskRunRecord) -> Result<()> {
        self.write(TASK_RUNS, record.id, record)
    }

    fn get_task_run(&self, id: Uuid) -> Result<Option<TaskRunRecord>> {
        self.read(TASK_RUNS, id)
    }

    fn task_runs_of(&self, pipeline_run: Uuid) -> Result<Vec<TaskRunRecord>> {
        let mut runs: Vec<TaskRunRecord> = self
            .read_all::<TaskRunRecord>(TASK_RUNS)?
            .into_iter()
            .filter(|r| r.pipeline_run == pipeline_run)
            .collect();
        runs.sort_by(|a, b| a.task.cmp(&b.task));
        Ok(runs)
    }

    fn list_task_runs(&self, selector: &Selector) -> Result<Vec<TaskRunRecord>> {
        let mut runs: Vec<TaskRunRecord> = self
            .read_all::<TaskRunRecord>(TASK_RUNS)?
            .into_iter()
            .filter(|r| selector.matches_task_run(r))
            .collect();
        runs.sort_by(|a, b| a.task.cmp(&b.task));
        Ok(runs)
    }

    fn put_attestation(&self, record: &AttestationRecord) -> Result<()> {
        if self.path_for(ATTESTATIONS, record.id).exists() {
            return Err(EngineError::Storage(format!(
                "attestation {} already exists",
                record.id
            )));
        }
        if self.attestation_for_run(record.run_id)?.is_some() {
            return Err(EngineError::Storage(format!(
                "run {} already has an attestation",
                record.run_id
            )));
        }
        self.write(ATTESTATIONS, record.id, record)
    }

    fn get_attestation(&self, id: Uuid) -> Result<Option<AttestationRecord>> {
        self.read(ATTESTATIONS, id)
    }

    fn attestation_for_run(&self, run_id: Uuid) -> Result<Option<AttestationRecord>> {
        Ok(self
            .read_all::<AttestationRecord>(ATTESTATIONS)?
            .into_iter()
            .find(|a| a.run_id == run_id))
    }

    fn put_signature(&self, record: &SignatureRecord) -> Result<()> {
        self.write(SIGNATURES, record.id, record)
    }

    fn get_signature(&self, id: Uuid) -> Result<Option<SignatureRecord>> {
        self.read(SIGNATURES, id)
    }

    fn signature_for_attestation(&self, attestation: Uuid) -> Result<Option<SignatureRecord>> {
        Ok(self
            .read_all::<SignatureRecord>(SIGNATURES)?
            .into_iter()
            .find(|s| s.attestation == attestation))
    }

    fn put_definition(&self, record: &DefinitionRecord) -> Result<()> {
        self.write(DEFINITIONS, record.id, record)
    }

    fn definitions_of(&self, pipeline_run: Uuid) -> Result<Vec<DefinitionRecord>> {
        let mut defs: Vec<DefinitionRecord> = self
            .read_all::<DefinitionRecord>(DEFINITIONS)?
            .into_iter()
            .filter(|d| d.pipeline_run == pipeline_run)
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }
}
