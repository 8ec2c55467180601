// src/config/validate.rs

use std::collections::HashSet;

use globset::Glob;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::binding::{task_param_refs, task_result_refs};
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{EngineError, Result};
use crate::types::{parse_duration, SignerMode};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_engine_section(cfg)?;
    validate_signing_section(cfg)?;
    validate_policies(cfg)?;
    validate_tasks(cfg)?;
    validate_pipeline_results(cfg)?;
    validate_signatures(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(EngineError::Definition(
            "pipeline must contain at least one [task.<name>] section".to_string(),
        ));
    }
    for (name, task) in cfg.task.iter() {
        if task.steps.is_empty() {
            return Err(EngineError::Definition(format!(
                "task '{name}' declares no steps"
            )));
        }
    }
    Ok(())
}

fn validate_engine_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.max_parallel == 0 {
        return Err(EngineError::Config(
            "[engine].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }

    for (field, value) in [
        ("task_timeout", &cfg.engine.task_timeout),
        ("pipeline_timeout", &cfg.engine.pipeline_timeout),
    ] {
        if let Some(s) = value {
            parse_duration(s)
                .map_err(|e| EngineError::Config(format!("[engine].{field}: {e}")))?;
        }
    }

    Ok(())
}

fn validate_signing_section(cfg: &RawConfigFile) -> Result<()> {
    match cfg.signing.mode {
        SignerMode::Key if cfg.signing.key_path.is_none() => Err(EngineError::Config(
            "[signing].mode = \"key\" requires [signing].key_path".to_string(),
        )),
        SignerMode::Keyless if cfg.signing.authority_url.is_none() => Err(EngineError::Config(
            "[signing].mode = \"keyless\" requires [signing].authority_url".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_policies(cfg: &RawConfigFile) -> Result<()> {
    for policy in &cfg.verification.policy {
        Glob::new(&policy.pattern).map_err(|e| {
            EngineError::Config(format!(
                "verification policy '{}' has invalid pattern '{}': {e}",
                policy.name, policy.pattern
            ))
        })?;

        if policy.identities.is_empty() {
            return Err(EngineError::Config(format!(
                "verification policy '{}' trusts no identities",
                policy.name
            )));
        }
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    let pipeline_params: HashSet<&str> =
        cfg.pipeline.params.keys().map(|s| s.as_str()).collect();

    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(EngineError::Definition(format!(
                    "task '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
            if dep == name {
                return Err(EngineError::Definition(format!(
                    "task '{name}' cannot depend on itself in `after`"
                )));
            }
        }

        for r in task_result_refs(task) {
            if r.task == *name {
                return Err(EngineError::Definition(format!(
                    "task '{name}' references its own result '{}'",
                    r.result
                )));
            }
            let Some(producer) = cfg.task.get(&r.task) else {
                return Err(EngineError::Definition(format!(
                    "task '{name}' references result of unknown task '{}'",
                    r.task
                )));
            };
            if !producer.results.contains_key(&r.result) {
                return Err(EngineError::Definition(format!(
                    "task '{name}' references undeclared result '{}' of task '{}'",
                    r.result, r.task
                )));
            }
        }

        // A $(params.X) in a step or gate may resolve to a task-local binding
        // or fall through to a pipeline parameter.
        for p in task_param_refs(task) {
            if !task.params.contains_key(&p) && !pipeline_params.contains(p.as_str()) {
                return Err(EngineError::Definition(format!(
                    "task '{name}' references unknown parameter '{p}'"
                )));
            }
        }

        for ws in &task.workspaces {
            if !cfg.workspace.contains_key(ws) {
                return Err(EngineError::Definition(format!(
                    "task '{name}' mounts undeclared workspace '{ws}'"
                )));
            }
        }

        if let Some(t) = &task.timeout {
            parse_duration(t)
                .map_err(|e| EngineError::Definition(format!("task '{name}' timeout: {e}")))?;
        }

        for gate in &task.when {
            if gate.values.is_empty() {
                return Err(EngineError::Definition(format!(
                    "task '{name}' has a `when` gate with an empty value set"
                )));
            }
        }
    }

    Ok(())
}

fn validate_pipeline_results(cfg: &RawConfigFile) -> Result<()> {
    for (name, expr) in cfg.pipeline.results.iter() {
        let refs = crate::binding::result_refs(expr);
        if refs.is_empty() {
            return Err(EngineError::Definition(format!(
                "pipeline result '{name}' does not reference any task result"
            )));
        }
        for r in refs {
            let Some(producer) = cfg.task.get(&r.task) else {
                return Err(EngineError::Definition(format!(
                    "pipeline result '{name}' references unknown task '{}'",
                    r.task
                )));
            };
            if !producer.results.contains_key(&r.result) {
                return Err(EngineError::Definition(format!(
                    "pipeline result '{name}' references undeclared result '{}' of task '{}'",
                    r.result, r.task
                )));
            }
        }
    }
    Ok(())
}

fn validate_signatures(cfg: &RawConfigFile) -> Result<()> {
    for sig in &cfg.signature {
        let sig_bytes = hex::decode(&sig.signature).map_err(|_| {
            EngineError::Definition(format!(
                "signature for resource '{}' is not valid hex",
                sig.resource
            ))
        })?;
        if sig_bytes.len() != 64 {
            return Err(EngineError::Definition(format!(
                "signature for resource '{}' has invalid length {} (expected 64 bytes)",
                sig.resource,
                sig_bytes.len()
            )));
        }

        let key_bytes = hex::decode(&sig.public_key).map_err(|_| {
            EngineError::Definition(format!(
                "public key for resource '{}' is not valid hex",
                sig.resource
            ))
        })?;
        if key_bytes.len() != 32 {
            return Err(EngineError::Definition(format!(
                "public key for resource '{}' has invalid length {} (expected 32 bytes)",
                sig.resource,
                key_bytes.len()
            )));
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> task. Both `after` edges and implicit result
    // references participate, so a cycle through either is rejected here,
    // before any run exists.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    let mut ref_storage: Vec<(String, String)> = Vec::new();
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
        for r in task_result_refs(task) {
            ref_storage.push((r.task, name.clone()));
        }
    }
    for (dep, name) in &ref_storage {
        graph.add_edge(dep.as_str(), name.as_str(), ());
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(EngineError::Definition(format!(
                "cycle detected in task DAG involving task '{node}'"
            )))
        }
    }
}
