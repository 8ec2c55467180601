// src/exec/mod.rs

//! Step execution layer.
//!
//! This module is responsible for actually running the steps a task
//! declares, and reporting back to the orchestration runtime via
//! `RuntimeEvent`s.
//!
//! - [`substrate`] provides the `ExecutionSubstrate` trait and the concrete
//!   `LocalProcessSubstrate` used in production; tests replace it with a
//!   scripted fake implementation.
//! - [`step_runner`] drives one task's steps in order, enforcing timeouts,
//!   cancellation, declared results and isolation verification.

pub mod step_runner;
pub mod substrate;

pub use substrate::{
    ExecutionSubstrate, IsolationReport, LocalProcessSubstrate, StepOutcome, StepRequest,
};
