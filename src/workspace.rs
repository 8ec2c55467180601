// src/workspace.rs

//! Workspace management: mutable storage shared across tasks of one run.
//!
//! Every pipeline run gets a directory tree under the storage root:
//!
//! ```text
//! <root>/runs/<run-id>/
//!   workspaces/<logical-name>/   one per declared [workspace.<name>]
//!   results/<task>/              declared result files written by steps
//! ```
//!
//! The engine does not arbitrate file-level locking inside a workspace;
//! concurrent writers to the same path are a pipeline-definition error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::config::model::WorkspaceConfig;
use crate::dag::ScheduledTask;
use crate::errors::{EngineError, Result};

/// Allocates per-run storage under a fixed root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Allocate the directory tree for one run and bind every declared
    /// logical workspace to a physical directory.
    ///
    /// Workspaces with a `seed` path have its contents copied in.
    pub fn allocate(
        &self,
        run_id: Uuid,
        workspaces: &BTreeMap<String, WorkspaceConfig>,
    ) -> Result<RunWorkspace> {
        let run_dir = self.root.join("runs").join(run_id.to_string());
        fs::create_dir_all(&run_dir)?;

        let mut bindings = BTreeMap::new();
        for (name, cfg) in workspaces {
            let dir = run_dir.join("workspaces").join(name);
            fs::create_dir_all(&dir)?;

            if let Some(seed) = &cfg.seed {
                copy_tree(Path::new(seed), &dir)?;
            }

            debug!(run_id = %run_id, workspace = %name, path = %dir.display(), "bound workspace");
            bindings.insert(name.clone(), dir);
        }

        Ok(RunWorkspace { run_dir, bindings })
    }
}

/// Bound storage for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    run_dir: PathBuf,
    bindings: BTreeMap<String, PathBuf>,
}

impl RunWorkspace {
    /// Prepare the filesystem paths a scheduled task needs: its results
    /// directory and the workspaces it mounts.
    pub fn task_paths(&self, task: &ScheduledTask) -> Result<TaskPaths> {
        let results_dir = self.run_dir.join("results").join(&task.name);
        fs::create_dir_all(&results_dir)?;

        let mut workspaces = BTreeMap::new();
        for name in &task.workspaces {
            let path = self.bindings.get(name).ok_or_else(|| {
                EngineError::Execution(format!(
                    "task '{}' mounts unbound workspace '{name}'",
                    task.name
                ))
            })?;
            workspaces.insert(name.clone(), path.clone());
        }

        // Steps run inside the first mounted workspace when there is one,
        // otherwise inside the run directory.
        let working_dir = task
            .workspaces
            .first()
            .and_then(|name| self.bindings.get(name).cloned())
            .unwrap_or_else(|| self.run_dir.clone());

        Ok(TaskPaths {
            working_dir,
            results_dir,
            workspaces,
        })
    }
}

/// Filesystem locations for one task run.
#[derive(Debug, Clone)]
pub struct TaskPaths {
    pub working_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Logical workspace name to mounted path.
    pub workspaces: BTreeMap<String, PathBuf>,
}

/// Recursively copy `src` into `dst`.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        return Err(EngineError::Config(format!(
            "workspace seed path does not exist: {}",
            src.display()
        )));
    }

    if src.is_file() {
        let name = src
            .file_name()
            .ok_or_else(|| EngineError::Config(format!("invalid seed path: {}", src.display())))?;
        fs::copy(src, dst.join(name))?;
        return Ok(());
    }

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&target)?;
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}
