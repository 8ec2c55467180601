// src/lib.rs

pub mod attest;
pub mod binding;
pub mod cli;
pub mod compliance;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod sign;
pub mod store;
pub mod transparency;
pub mod types;
pub mod verify;
pub mod workspace;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::attest::{
    ArtifactRegistry, AttestationGenerator, LocalArtifactRegistry, LocalSourceResolver,
    Material, SourceResolver,
};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, ResourceKind};
use crate::dag::{ExecutionPlan, PipelineStatus};
use crate::engine::{
    CoreRuntime, ProvenanceServices, RunReport, Runtime, RuntimeEvent,
};
use crate::errors::{EngineError, Result};
use crate::exec::{ExecutionSubstrate, LocalProcessSubstrate};
use crate::sign::Signer;
use crate::store::{DefinitionRecord, PipelineRunRecord, RunStore, RunWarning, WarningKind};
use crate::transparency::{EmbeddedTransparencyLog, TransparencyWitness};
use crate::types::{parse_duration, StorageMode};
use crate::verify::{canonical_resource_bytes, PolicyEngine, VerificationStatus};
use crate::workspace::WorkspaceManager;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - resource verification (Trusted Resources)
/// - plan / core / runtime
/// - execution substrate, store, signer, transparency log
/// - Ctrl-C handling
///
/// Returns `None` in `--dry-run` mode.
pub async fn run(args: CliArgs) -> Result<Option<RunReport>> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(None);
    }

    let params = parse_param_overrides(&args.params)?;
    let deps = EngineDeps::production(&cfg)?;

    let report = execute_pipeline(&cfg, params, deps).await?;
    Ok(Some(report))
}

/// External collaborators of one engine instance.
///
/// Production wiring comes from [`EngineDeps::production`]; tests inject
/// scripted fakes for any subset.
pub struct EngineDeps {
    pub store: Arc<dyn RunStore>,
    pub substrate: Arc<dyn ExecutionSubstrate>,
    pub signer: Arc<Signer>,
    pub transparency: Option<Arc<dyn TransparencyWitness>>,
    pub registry: Arc<dyn ArtifactRegistry>,
    pub resolver: Arc<dyn SourceResolver>,
}

impl EngineDeps {
    /// Default production collaborators for the configured backends.
    pub fn production(cfg: &ConfigFile) -> Result<Self> {
        let storage_root = Path::new(&cfg.engine.storage_dir);
        let store = store::open(cfg.engine.storage, storage_root)?;

        let transparency: Option<Arc<dyn TransparencyWitness>> = if cfg.signing.transparency {
            let log: Arc<dyn TransparencyWitness> = match cfg.engine.storage {
                StorageMode::Memory => Arc::new(EmbeddedTransparencyLog::in_memory()),
                StorageMode::Embedded => Arc::new(EmbeddedTransparencyLog::at_path(
                    storage_root.join("transparency.log"),
                )?),
            };
            Some(log)
        } else {
            None
        };

        Ok(Self {
            store,
            substrate: Arc::new(LocalProcessSubstrate::new()),
            signer: Arc::new(Signer::from_config(&cfg.signing)),
            transparency,
            registry: Arc::new(LocalArtifactRegistry::new()),
            resolver: Arc::new(LocalSourceResolver::new()),
        })
    }
}

/// Execute one pipeline run to completion.
///
/// Verification failures under an Enforce policy (and definition errors)
/// are returned before any run object is created.
pub async fn execute_pipeline(
    cfg: &ConfigFile,
    params: BTreeMap<String, String>,
    deps: EngineDeps,
) -> Result<RunReport> {
    // Verify-before-use: the pipeline and every task definition must pass
    // the policy engine before the scheduler may dispatch anything.
    let policy = PolicyEngine::from_config(&cfg.verification)?;

    let pipeline_canonical = canonical_resource_bytes(
        ResourceKind::Pipeline,
        &cfg.pipeline.name,
        &cfg.pipeline,
    )?;
    let pipeline_verification = policy.check(
        ResourceKind::Pipeline,
        &cfg.pipeline.name,
        &pipeline_canonical,
        cfg.signature_for(&cfg.pipeline.name),
    )?;

    let mut task_verification = BTreeMap::new();
    for (name, task) in cfg.task.iter() {
        let canonical = canonical_resource_bytes(ResourceKind::Task, name, task)?;
        let status = policy.check(ResourceKind::Task, name, &canonical, cfg.signature_for(name))?;
        task_verification.insert(name.clone(), status);
    }

    // Fixed execution plan, resolved once.
    let run_id = Uuid::new_v4();
    let plan = ExecutionPlan::new(cfg, run_id, params)?;

    // Workspace allocation and initial records.
    let manager = WorkspaceManager::new(&cfg.engine.storage_dir);
    let run_workspace = manager.allocate(run_id, &cfg.workspace)?;

    persist_initial_records(cfg, &deps, run_id, &plan, pipeline_verification.clone())?;

    // Materials are resolved once per run; failures degrade to warnings.
    let (materials, material_warnings) = resolve_materials(cfg, deps.resolver.as_ref());

    let pipeline_timeout = match &cfg.engine.pipeline_timeout {
        Some(s) => Some(parse_duration(s).map_err(EngineError::Config)?),
        None => None,
    };

    let (event_tx, event_rx) = mpsc::channel::<RuntimeEvent>(64);

    // Ctrl-C → graceful cancellation.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx
                .send(RuntimeEvent::CancelRequested {
                    reason: "interrupted".to_string(),
                })
                .await;
        });
    }

    let services = ProvenanceServices {
        store: Arc::clone(&deps.store),
        generator: AttestationGenerator::new(
            cfg.engine.builder_id.clone(),
            cfg.engine.attestation_version.clone(),
        ),
        signer: Arc::clone(&deps.signer),
        transparency: deps.transparency.clone(),
        registry: Arc::clone(&deps.registry),
        materials,
    };

    let core = CoreRuntime::new(plan, cfg.engine.max_parallel);
    let mut runtime = Runtime::new(
        core,
        event_rx,
        event_tx,
        Arc::clone(&deps.substrate),
        run_workspace,
        cfg.engine.isolation_enforcement,
        pipeline_timeout,
        services,
        pipeline_verification,
        task_verification,
    );
    runtime.push_warnings(material_warnings);

    runtime.run().await
}

/// Store the initial pipeline record and per-run definition snapshots.
fn persist_initial_records(
    cfg: &ConfigFile,
    deps: &EngineDeps,
    run_id: Uuid,
    plan: &ExecutionPlan,
    verification: VerificationStatus,
) -> Result<()> {
    let record = PipelineRunRecord {
        id: run_id,
        pipeline: cfg.pipeline.name.clone(),
        pipeline_version: cfg.pipeline.version.clone(),
        status: PipelineStatus::Pending,
        params: plan.params().clone(),
        labels: cfg.pipeline.labels.clone(),
        started_at: Utc::now(),
        finished_at: None,
        results: BTreeMap::new(),
        verification,
        warnings: Vec::new(),
    };
    deps.store.put_pipeline_run(&record)?;

    deps.store.put_definition(&DefinitionRecord {
        id: Uuid::new_v4(),
        pipeline_run: run_id,
        kind: ResourceKind::Pipeline,
        name: cfg.pipeline.name.clone(),
        document: serde_json::to_value(&cfg.pipeline)?,
        created_at: Utc::now(),
    })?;

    for (name, task) in cfg.task.iter() {
        deps.store.put_definition(&DefinitionRecord {
            id: Uuid::new_v4(),
            pipeline_run: run_id,
            kind: ResourceKind::Task,
            name: name.clone(),
            document: serde_json::to_value(task)?,
            created_at: Utc::now(),
        })?;
    }

    Ok(())
}

/// Resolve declared materials, degrading failures to structured warnings.
fn resolve_materials(
    cfg: &ConfigFile,
    resolver: &dyn SourceResolver,
) -> (Vec<Material>, Vec<RunWarning>) {
    let mut materials = Vec::new();
    let mut warnings = Vec::new();

    for m in &cfg.pipeline.materials {
        match resolver.resolve(&m.uri) {
            Ok(material) => materials.push(material),
            Err(e) => {
                warn!(uri = %m.uri, error = %e, "material resolution failed");
                warnings.push(RunWarning {
                    kind: WarningKind::Materials,
                    message: format!("material '{}' not resolved: {e}", m.uri),
                });
            }
        }
    }

    (materials, warnings)
}

/// Parse `--param name=value` overrides.
fn parse_param_overrides(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for entry in raw {
        match entry.split_once('=') {
            Some((name, value)) => {
                params.insert(name.trim().to_string(), value.to_string());
            }
            None => {
                return Err(EngineError::Definition(format!(
                    "invalid --param '{entry}' (expected NAME=VALUE)"
                )));
            }
        }
    }
    Ok(params)
}

/// Simple dry-run output: print the pipeline, its parameters and tasks.
fn print_dry_run(cfg: &ConfigFile) {
    println!("gantry dry-run");
    println!("  pipeline: {} (version {})", cfg.pipeline.name, cfg.pipeline.version);
    println!("  engine.max_parallel = {}", cfg.engine.max_parallel);
    println!("  signing.mode = {:?}", cfg.signing.mode);
    println!("  verification.mode = {:?}", cfg.verification.mode);
    println!();

    if !cfg.pipeline.params.is_empty() {
        println!("params:");
        for (name, p) in cfg.pipeline.params.iter() {
            match &p.default {
                Some(d) => println!("  - {name} (default: {d})"),
                None => println!("  - {name} (required)"),
            }
        }
        println!();
    }

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        for step in &task.steps {
            println!("      step {}: {}", step.name, step.command);
        }
        if !task.results.is_empty() {
            let results: Vec<&str> = task.results.keys().map(|s| s.as_str()).collect();
            println!("      results: {results:?}");
        }
        if task.isolation.any() {
            println!(
                "      isolation: network_disabled={} filesystem_read_only={} deps_prestaged={}",
                task.isolation.network_disabled,
                task.isolation.filesystem_read_only,
                task.isolation.deps_prestaged
            );
        }
        if !task.when.is_empty() {
            println!("      when: {} gate(s)", task.when.len());
        }
        if task.continue_on_failure {
            println!("      continue_on_failure: true");
        }
    }

    info!("dry-run complete (no execution)");
}
