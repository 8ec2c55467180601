// src/compliance.rs

//! Compliance evaluation.
//!
//! After a pipeline run completes, the evaluator aggregates the stored
//! evidence (attestations, signatures, verification outcomes, isolation
//! reports) into a discrete level 0-4. Criteria build on each other:
//!
//! 1. the run was scripted and produced provenance (else level 0)
//! 2. the provenance is signed (else level stays 1)
//! 3. every definition was verified under an Enforce policy and every task
//!    executed in an isolated context (else level stays 2)
//! 4. execution was hermetic: network disabled and achieved, dependencies
//!    pre-staged, no isolation violations (else level stays 3)
//!
//! A report always enumerates the specific missing evidence for the first
//! unmet criterion, never just the numeric level.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dag::{PipelineStatus, RunState};
use crate::errors::{EngineError, Result};
use crate::store::records::WarningKind;
use crate::store::{RunStore, TaskRunRecord};

/// A specific piece of missing evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceGap {
    /// The criterion that was not met, e.g. `"signed-provenance"`.
    pub criterion: String,
    pub evidence: String,
}

/// The achieved compliance level with its gap enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub run_id: Uuid,
    pub level: u8,
    pub gaps: Vec<ComplianceGap>,
}

impl ComplianceReport {
    /// One-line human summary for logs.
    pub fn describe(&self) -> String {
        if self.gaps.is_empty() {
            format!("compliance level {} (all criteria met)", self.level)
        } else {
            let gaps: Vec<&str> = self.gaps.iter().map(|g| g.evidence.as_str()).collect();
            format!(
                "compliance level {} (unmet: {})",
                self.level,
                gaps.join("; ")
            )
        }
    }
}

/// Evaluates completed runs against the compliance criteria.
///
/// The evaluator works purely off the run store; everything it needs must be
/// persisted, which keeps it usable as offline audit tooling.
pub struct ComplianceEvaluator<'a> {
    store: &'a dyn RunStore,
}

impl<'a> ComplianceEvaluator<'a> {
    pub fn new(store: &'a dyn RunStore) -> Self {
        Self { store }
    }

    pub fn evaluate(&self, run_id: Uuid) -> Result<ComplianceReport> {
        let run = self
            .store
            .get_pipeline_run(run_id)?
            .ok_or_else(|| EngineError::Storage(format!("unknown pipeline run {run_id}")))?;
        let tasks = self.store.task_runs_of(run_id)?;

        let mut level = 0;
        let mut gaps = Vec::new();

        // Criterion 1: scripted build that produced provenance.
        self.check_provenance(&run.status, run_id, &tasks, &mut gaps)?;
        if gaps.is_empty() {
            level = 1;

            // Criterion 2: provenance is signed.
            self.check_signatures(run_id, &run.warnings, &tasks, &mut gaps)?;
        }
        if gaps.is_empty() {
            level = 2;

            // Criterion 3: verified definitions, isolated execution.
            check_verification_and_isolation(&run.verification, &tasks, &mut gaps);
        }
        if gaps.is_empty() {
            level = 3;

            // Criterion 4: hermetic execution.
            check_hermeticity(&tasks, &mut gaps);
        }
        if gaps.is_empty() {
            level = 4;
        }

        Ok(ComplianceReport {
            run_id,
            level,
            gaps,
        })
    }

    fn check_provenance(
        &self,
        status: &PipelineStatus,
        run_id: Uuid,
        tasks: &[TaskRunRecord],
        gaps: &mut Vec<ComplianceGap>,
    ) -> Result<()> {
        let criterion = "scripted-provenance";

        if *status != PipelineStatus::Succeeded {
            gaps.push(ComplianceGap {
                criterion: criterion.to_string(),
                evidence: format!("run did not succeed (status {status:?}); no attestation exists"),
            });
            return Ok(());
        }

        if self.store.attestation_for_run(run_id)?.is_none() {
            gaps.push(ComplianceGap {
                criterion: criterion.to_string(),
                evidence: "pipeline run has no attestation".to_string(),
            });
        }

        for task in tasks {
            if task.status == RunState::Succeeded
                && self.store.attestation_for_run(task.id)?.is_none()
            {
                gaps.push(ComplianceGap {
                    criterion: criterion.to_string(),
                    evidence: format!("task '{}' succeeded without an attestation", task.task),
                });
            }
        }

        Ok(())
    }

    fn check_signatures(
        &self,
        run_id: Uuid,
        run_warnings: &[crate::store::RunWarning],
        tasks: &[TaskRunRecord],
        gaps: &mut Vec<ComplianceGap>,
    ) -> Result<()> {
        let criterion = "signed-provenance";

        let mut unsigned: Vec<(String, Uuid)> = Vec::new();
        if let Some(att) = self.store.attestation_for_run(run_id)? {
            if self.store.signature_for_attestation(att.id)?.is_none() {
                unsigned.push(("pipeline run".to_string(), att.id));
            }
        }
        for task in tasks {
            if task.status != RunState::Succeeded {
                continue;
            }
            if let Some(att) = self.store.attestation_for_run(task.id)? {
                if self.store.signature_for_attestation(att.id)?.is_none() {
                    unsigned.push((format!("task '{}'", task.task), att.id));
                }
            }
        }

        // Recorded signing warnings carry the concrete failure cause (e.g.
        // authority unreachable); prefer them as evidence.
        let signing_warnings: Vec<&str> = run_warnings
            .iter()
            .chain(tasks.iter().flat_map(|t| t.warnings.iter()))
            .filter(|w| w.kind == WarningKind::Signing)
            .map(|w| w.message.as_str())
            .collect();

        for (what, _) in unsigned {
            let evidence = if signing_warnings.is_empty() {
                format!("attestation for {what} is unsigned")
            } else {
                format!(
                    "attestation for {what} is unsigned ({})",
                    signing_warnings.join("; ")
                )
            };
            gaps.push(ComplianceGap {
                criterion: criterion.to_string(),
                evidence,
            });
        }

        Ok(())
    }
}

fn check_verification_and_isolation(
    pipeline_verification: &crate::verify::VerificationStatus,
    tasks: &[TaskRunRecord],
    gaps: &mut Vec<ComplianceGap>,
) {
    let criterion = "verified-and-isolated";

    if !pipeline_verification.verified_enforced() {
        gaps.push(ComplianceGap {
            criterion: criterion.to_string(),
            evidence: "pipeline definition was not verified under an enforce policy".to_string(),
        });
    }

    for task in tasks {
        if !task.verification.verified_enforced() {
            gaps.push(ComplianceGap {
                criterion: criterion.to_string(),
                evidence: format!(
                    "task '{}' definition was not verified under an enforce policy",
                    task.task
                ),
            });
        }

        // Only executed tasks have an execution context to judge.
        if task.status == RunState::Succeeded {
            let isolated = task
                .isolation_report
                .map(|r| r.context_isolated)
                .unwrap_or(false);
            if !isolated {
                gaps.push(ComplianceGap {
                    criterion: criterion.to_string(),
                    evidence: format!(
                        "task '{}' did not execute in an isolated context",
                        task.task
                    ),
                });
            }
        }
    }
}

fn check_hermeticity(tasks: &[TaskRunRecord], gaps: &mut Vec<ComplianceGap>) {
    let criterion = "hermetic-execution";

    for task in tasks {
        if task.status != RunState::Succeeded {
            continue;
        }

        let report = task.isolation_report.unwrap_or_default();

        if !(task.isolation_requested.network_disabled && report.network_isolated == Some(true)) {
            gaps.push(ComplianceGap {
                criterion: criterion.to_string(),
                evidence: format!(
                    "task '{}' executed with network reachable",
                    task.task
                ),
            });
        }
        if !(task.isolation_requested.deps_prestaged && report.deps_prestaged == Some(true)) {
            gaps.push(ComplianceGap {
                criterion: criterion.to_string(),
                evidence: format!(
                    "task '{}' executed without pre-staged dependencies",
                    task.task
                ),
            });
        }
        for violation in &task.violations {
            gaps.push(ComplianceGap {
                criterion: criterion.to_string(),
                evidence: format!("task '{}': {violation}", task.task),
            });
        }
    }
}
