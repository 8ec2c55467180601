// src/config/loader.rs

//! Reading pipeline definitions from disk.

use std::fs;
use std::path::Path;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read a TOML pipeline file and run definition-time validation.
///
/// Everything the validator can reject is rejected here, before any run
/// object exists: cyclic `after`/result-reference graphs, dangling task,
/// result, parameter and workspace references, and malformed durations,
/// policies and detached signatures.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw = read_raw(path.as_ref())?;
    ConfigFile::try_from(raw)
}

/// TOML deserialization only, no semantic checks. Callers that want a
/// usable definition go through [`load_and_validate`].
pub fn read_raw(path: &Path) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}
