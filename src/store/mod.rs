// src/store/mod.rs

//! Persisted run state.
//!
//! Run records, attestations, signatures and definition snapshots are
//! retrievable by unique identifier and by selector query. Records are never
//! implicitly destroyed; attestations additionally refuse overwrites, since
//! a provenance document is immutable once created.
//!
//! - [`records`] defines the stored types and the selector.
//! - [`memory`] keeps everything in process memory (tests, throwaway runs).
//! - [`embedded`] writes JSON documents under the storage root.

pub mod embedded;
pub mod memory;
pub mod records;

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::errors::Result;
use crate::types::StorageMode;

pub use embedded::EmbeddedStore;
pub use memory::MemoryStore;
pub use records::{
    AttestationRecord, DefinitionRecord, PipelineRunRecord, RunWarning, Selector,
    SignatureRecord, TaskRunRecord, WarningKind,
};

/// Storage boundary for everything the engine persists.
///
/// `put_*` for run records is an upsert, since runs mutate status as they
/// progress. `put_attestation` is insert-only.
pub trait RunStore: Send + Sync {
    fn put_pipeline_run(&self, record: &PipelineRunRecord) -> Result<()>;
    fn get_pipeline_run(&self, id: Uuid) -> Result<Option<PipelineRunRecord>>;
    fn list_pipeline_runs(&self, selector: &Selector) -> Result<Vec<PipelineRunRecord>>;

    fn put_task_run(&self, record: &TaskRunRecord) -> Result<()>;
    fn get_task_run(&self, id: Uuid) -> Result<Option<TaskRunRecord>>;
    /// All task runs belonging to one pipeline run.
    fn task_runs_of(&self, pipeline_run: Uuid) -> Result<Vec<TaskRunRecord>>;
    fn list_task_runs(&self, selector: &Selector) -> Result<Vec<TaskRunRecord>>;

    fn put_attestation(&self, record: &AttestationRecord) -> Result<()>;
    fn get_attestation(&self, id: Uuid) -> Result<Option<AttestationRecord>>;
    fn attestation_for_run(&self, run_id: Uuid) -> Result<Option<AttestationRecord>>;

    fn put_signature(&self, record: &SignatureRecord) -> Result<()>;
    fn get_signature(&self, id: Uuid) -> Result<Option<SignatureRecord>>;
    fn signature_for_attestation(&self, attestation: Uuid) -> Result<Option<SignatureRecord>>;

    fn put_definition(&self, record: &DefinitionRecord) -> Result<()>;
    fn definitions_of(&self, pipeline_run: Uuid) -> Result<Vec<DefinitionRecord>>;
}

/// Open the configured storage backend.
pub fn open(mode: StorageMode, root: &Path) -> Result<Arc<dyn RunStore>> {
    match mode {
        StorageMode::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageMode::Embedded => Ok(Arc::new(EmbeddedStore::open(root)?)),
    }
}
