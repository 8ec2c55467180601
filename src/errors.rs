// src/errors.rs

//! Crate-wide error taxonomy and helpers.
//!
//! The variants mirror the failure classes of the engine:
//! - [`EngineError::Definition`] and [`EngineError::Verification`] are raised
//!   before any run is created and are never retried.
//! - [`EngineError::Execution`] terminates a task run as Failed/Cancelled.
//! - [`EngineError::Attestation`], [`EngineError::Signing`] and
//!   [`EngineError::Transparency`] are non-fatal to the run; callers record
//!   them as structured warnings on the run record instead of propagating.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("definition error: {0}")]
    Definition(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("attestation error: {0}")]
    Attestation(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("transparency log error: {0}")]
    Transparency(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
