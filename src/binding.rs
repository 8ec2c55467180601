// src/binding.rs

//! Parameter and result reference expressions.
//!
//! Definitions may embed `$(params.<name>)` and
//! `$(tasks.<task>.results.<result>)` expressions in step commands, step env
//! values, `when` gate inputs and pipeline result declarations. This module
//! extracts those references (the validator turns result references into DAG
//! edges) and substitutes bound values at run time.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{EngineError, Result};

static PARAM_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(params\.([A-Za-z0-9_-]+)\)").expect("param ref regex"));

static RESULT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(tasks\.([A-Za-z0-9_-]+)\.results\.([A-Za-z0-9_-]+)\)")
        .expect("result ref regex")
});

/// A reference to another task's declared result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultRef {
    pub task: String,
    pub result: String,
}

/// All `$(params.X)` names referenced by the input string.
pub fn param_refs(input: &str) -> Vec<String> {
    PARAM_REF
        .captures_iter(input)
        .map(|c| c[1].to_string())
        .collect()
}

/// All `$(tasks.T.results.R)` references in the input string.
pub fn result_refs(input: &str) -> Vec<ResultRef> {
    RESULT_REF
        .captures_iter(input)
        .map(|c| ResultRef {
            task: c[1].to_string(),
            result: c[2].to_string(),
        })
        .collect()
}

/// Every result reference appearing anywhere in a task definition: parameter
/// bindings, `when` gates, step commands and step env values.
pub fn task_result_refs(task: &crate::config::model::TaskConfig) -> Vec<ResultRef> {
    let mut refs = Vec::new();

    for value in task.params.values() {
        refs.extend(result_refs(value));
    }
    for gate in &task.when {
        refs.extend(result_refs(&gate.input));
        for v in &gate.values {
            refs.extend(result_refs(v));
        }
    }
    for step in &task.steps {
        refs.extend(result_refs(&step.command));
        for v in step.env.values() {
            refs.extend(result_refs(v));
        }
    }

    refs
}

/// Every `$(params.X)` name appearing anywhere in a task definition.
pub fn task_param_refs(task: &crate::config::model::TaskConfig) -> Vec<String> {
    let mut refs = Vec::new();

    for value in task.params.values() {
        refs.extend(param_refs(value));
    }
    for gate in &task.when {
        refs.extend(param_refs(&gate.input));
        for v in &gate.values {
            refs.extend(param_refs(v));
        }
    }
    for step in &task.steps {
        refs.extend(param_refs(&step.command));
        for v in step.env.values() {
            refs.extend(param_refs(v));
        }
    }

    refs
}

/// Replace every `$(params.X)` with its bound value.
///
/// An unresolvable reference is an error; validation catches these before a
/// run exists, so hitting one here means the caller bound the wrong set.
pub fn substitute_params(input: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in PARAM_REF.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];

        let value = params.get(name).ok_or_else(|| {
            EngineError::Definition(format!("unresolvable parameter reference $(params.{name})"))
        })?;

        out.push_str(&input[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }

    out.push_str(&input[last..]);
    Ok(out)
}

/// Replace every `$(tasks.T.results.R)` with the produced result value.
///
/// `results` maps task name to that task's realized results. Only results of
/// Succeeded tasks are present, so an unresolvable reference means the
/// producer did not succeed.
pub fn substitute_results(
    input: &str,
    results: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in RESULT_REF.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let task = &caps[1];
        let result = &caps[2];

        let value = results
            .get(task)
            .and_then(|r| r.get(result))
            .ok_or_else(|| {
                EngineError::Execution(format!(
                    "result $(tasks.{task}.results.{result}) is not available"
                ))
            })?;

        out.push_str(&input[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }

    out.push_str(&input[last..]);
    Ok(out)
}
