// src/store/memory.rs

//! In-memory run store.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::store::records::{
    AttestationRecord, DefinitionRecord, PipelineRunRecord, Selector, SignatureRecord,
    TaskRunRecord,
};
use crate::store::RunStore;

#[derive(Default)]
struct Inner {
    pipeline_runs: HashMap<Uuid, PipelineRunRecord>,
    task_runs: HashMap<Uuid, TaskRunRecord>,
    attestations: HashMap<Uuid, AttestationRecord>,
    signatures: HashMap<Uuid, SignatureRecord>,
    definitions: HashMap<Uuid, DefinitionRecord>,
}

/// Store keeping all records in process memory. Contents are lost on exit,
/// so this is for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| EngineError::Storage("store lock poisoned".to_string()))
    }
}

impl RunStore for MemoryStore {
    fn put_pipeline_run(&self, record: &PipelineRunRecord) -> Result<()> {
        self.lock()?.pipeline_runs.insert(record.id, record.clone());
        Ok(())
    }

    fn get_pipeline_run(&self, id: Uuid) -> Result<Option<PipelineRunRecord>> {
        Ok(self.lock()?.pipeline_runs.get(&id).cloned())
    }

    fn list_pipeline_runs(&self, selector: &Selector) -> Result<Vec<PipelineRunRecord>> {
        let inner = self.lock()?;
        let mut runs: Vec<PipelineRunRecord> = inner
            .pipeline_runs
            .values()
            .filter(|r| selector.matches_pipeline_run(r))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    fn put_task_run(&self, record: &TaskRunRecord) -> Result<()> {
        self.lock()?.task_runs.insert(record.id, record.clone());
        Ok(())
    }

    fn get_task_run(&self, id: Uuid) -> Result<Option<TaskRunRecord>> {
        Ok(self.lock()?.task_runs.get(&id).cloned())
    }

    fn task_runs_of(&self, pipeline_run: Uuid) -> Result<Vec<TaskRunRecord>> {
        let inner = self.lock()?;
        let mut runs: Vec<TaskRunRecord> = inner
            .task_runs
            .values()
            .filter(|r| r.pipeline_run == pipeline_run)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.task.cmp(&b.task));
        Ok(runs)
    }

    fn list_task_runs(&self, selector: &Selector) -> Result<Vec<TaskRunRecord>> {
        let inner = self.lock()?;
        let mut runs: Vec<TaskRunRecord> = inner
            .task_runs
            .values()
            .filter(|r| selector.matches_task_run(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.task.cmp(&b.task));
        Ok(runs)
    }

    fn put_attestation(&self, record: &AttestationRecord) -> Result<()> {
        let mut inner = self.lock()?;

        // One attestation per run, immutable thereafter.
        if inner.attestations.contains_key(&record.id) {
            return Err(EngineError::Storage(format!(
                "attestation {} already exists",
                record.id
            )));
        }
        if inner
            .attestations
            .values()
            .any(|a| a.run_id == record.run_id)
        {
            return Err(EngineError::Storage(format!(
                "run {} already has an attestation",
                record.run_id
            )));
        }

        inner.attestations.insert(record.id, record.clone());
        Ok(())
    }

    fn get_attestation(&self, id: Uuid) -> Result<Option<AttestationRecord>> {
        Ok(self.lock()?.attestations.get(&id).cloned())
    }

    fn attestation_for_run(&self, run_id: Uuid) -> Result<Option<AttestationRecord>> {
        Ok(self
            .lock()?
            .attestations
            .values()
            .find(|a| a.run_id == run_id)
            .cloned())
    }

    fn put_signature(&self, record: &SignatureRecord) -> Result<()> {
        self.lock()?.signatures.insert(record.id, record.clone());
        Ok(())
    }

    fn get_signature(&self, id: Uuid) -> Result<Option<SignatureRecord>> {
        Ok(self.lock()?.signatures.get(&id).cloned())
    }

    fn signature_for_attestation(&self, attestation: Uuid) -> Result<Option<SignatureRecord>> {
        Ok(self
            .lock()?
            .signatures
            .values()
            .find(|s| s.attestation == attestation)
            .cloned())
    }

    fn put_definition(&self, record: &DefinitionRecord) -> Result<()> {
        self.lock()?.definitions.insert(record.id, record.clone());
        Ok(())
    }

    fn definitions_of(&self, pipeline_run: Uuid) -> Result<Vec<DefinitionRecord>> {
        let inner = self.lock()?;
        let mut defs: Vec<DefinitionRecord> = inner
            .definitions
            .values()
            .filter(|d| d.pipeline_run == pipeline_run)
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }
}
