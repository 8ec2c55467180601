// src/config/mod.rs

//! Definition loading and validation.
//!
//! - [`model`] maps the TOML file into raw and validated config types.
//! - [`loader`] reads the file from disk.
//! - [`validate`] rejects invalid definitions (cycles, dangling references)
//!   before any run object exists.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::load_and_validate;
pub use model::{
    ConfigFile, EngineSection, IsolationSpec, MaterialConfig, ParamConfig, PipelineSection,
    PolicyConfig, RawConfigFile, ResourceKind, ResourceSignatureConfig, ResultConfig,
    SigningSection, StepConfig, TaskConfig, VerificationSection, WhenConfig, WhenOperator,
    WorkspaceConfig,
};
