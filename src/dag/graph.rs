// src/dag/graph.rs

use std::collections::HashMap;

use crate::binding::task_result_refs;
use crate::config::model::ConfigFile;

/// How a dependency edge was declared.
///
/// Result edges are stricter than ordering edges: a consumer of another
/// task's result may only run once the producer has Succeeded, whereas an
/// ordering (`after`) edge is also satisfied by a gate-skipped producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Declared in `after = [...]`.
    Ordering,
    /// Implied by a `$(tasks.<task>.results.<result>)` reference.
    Result,
}

/// Internal node structure: immediate dependencies with the strongest edge
/// kind per predecessor.
#[derive(Debug, Clone)]
struct DagNode {
    deps: Vec<(String, EdgeKind)>,
}

/// In-memory DAG representation keyed by task name.
///
/// Acyclicity is already validated in `config::validate`; here we only keep
/// adjacency information for readiness checks and skip propagation. The graph
/// is built once per run into a fixed execution plan, never recomputed from
/// definitions on a tick.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: HashMap<String, DagNode>,
}

impl TaskGraph {
    /// Build the dependency graph from a validated [`ConfigFile`].
    ///
    /// `after` entries become ordering edges; result references become result
    /// edges. When both exist for the same predecessor, the result edge wins.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut nodes: HashMap<String, DagNode> = HashMap::new();

        for (name, task) in cfg.task.iter() {
            let mut deps: Vec<(String, EdgeKind)> = Vec::new();

            for dep in task.after.iter() {
                deps.push((dep.clone(), EdgeKind::Ordering));
            }
            for r in task_result_refs(task) {
                match deps.iter_mut().find(|(d, _)| *d == r.task) {
                    Some(existing) => existing.1 = EdgeKind::Result,
                    None => deps.push((r.task, EdgeKind::Result)),
                }
            }

            nodes.insert(name.clone(), DagNode { deps });
        }

        Self { nodes }
    }

    /// Immediate dependencies of a task with their edge kinds.
    pub fn dependencies_of(&self, name: &str) -> &[(String, EdgeKind)] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }
}
