// src/engine/core.rs

//! Synchronous scheduling core.
//!
//! [`CoreRuntime`] is a deterministic state machine: it consumes
//! [`RuntimeEvent`]s and answers with [`CoreStep`]s describing what the IO
//! shell (`engine::runtime::Runtime`) must do next, which is where dispatch,
//! timeouts, Ctrl-C, record keeping and the provenance chain live. Keeping
//! every scheduling decision in here means the semantics are testable
//! without Tokio, channels, or processes.

use crate::dag::ExecutionPlan;
use crate::engine::event_handlers::{
    handle_cancel, handle_start, handle_task_completion, CoreStep,
};
use crate::engine::gate::DispatchGate;
use crate::engine::RuntimeEvent;

/// The scheduling state of one pipeline run: the execution plan plus the
/// dispatch gate bounding concurrency. Owns no channels and performs no IO.
#[derive(Debug)]
pub struct CoreRuntime {
    plan: ExecutionPlan,
    gate: DispatchGate,
}

impl CoreRuntime {
    pub fn new(plan: ExecutionPlan, max_parallel: usize) -> Self {
        Self {
            plan,
            gate: DispatchGate::new(max_parallel),
        }
    }

    /// Read access to the plan, used by the IO shell for record keeping.
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Begin the run and return the initial dispatch commands.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.plan, &mut self.gate)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TaskCompleted { task, completion } => handle_task_completion(
                &mut self.plan,
                &mut self.gate,
                &task,
                &completion.outcome,
            ),
            RuntimeEvent::CancelRequested { reason } => {
                handle_cancel(&mut self.plan, &mut self.gate, &reason)
            }
            RuntimeEvent::PipelineTimedOut => handle_cancel(
                &mut self.plan,
                &mut self.gate,
                "pipeline timeout exceeded",
            ),
        }
    }
}
