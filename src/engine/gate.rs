// src/engine/gate.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::dag::ScheduledTask;

/// FIFO gate bounding how many tasks of one pipeline run execute at once.
///
/// The scheduler marks tasks Running as soon as their dependencies settle;
/// the gate decides when they are actually handed to the executor. Tasks
/// beyond the configured limit wait here and are released as completions
/// free up slots.
#[derive(Debug)]
pub struct DispatchGate {
    max_parallel: usize,
    in_flight: usize,
    pending: VecDeque<ScheduledTask>,
}

impl DispatchGate {
    /// Create a gate with the given concurrency limit.
    ///
    /// `max_parallel` is clamped to at least 1; a zero-width gate would never
    /// dispatch anything.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            in_flight: 0,
            pending: VecDeque::new(),
        }
    }

    /// Queue ready tasks for dispatch.
    pub fn push(&mut self, tasks: Vec<ScheduledTask>) {
        for task in tasks {
            debug!(task = %task.name, "queueing task behind dispatch gate");
            self.pending.push_back(task);
        }
    }

    /// Take as many queued tasks as the concurrency limit allows, counting
    /// them as in-flight.
    pub fn take_dispatchable(&mut self) -> Vec<ScheduledTask> {
        let mut out = Vec::new();
        while self.in_flight < self.max_parallel {
            match self.pending.pop_front() {
                Some(task) => {
                    self.in_flight += 1;
                    out.push(task);
                }
                None => break,
            }
        }
        out
    }

    /// Record that an in-flight task completed, freeing a slot.
    pub fn on_completion(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Remove and return every queued (never dispatched) task. Used on
    /// cancellation.
    pub fn drain_pending(&mut self) -> Vec<ScheduledTask> {
        self.pending.drain(..).collect()
    }
}
