// src/config/model.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    IsolationEnforcement, SignerMode, StorageMode, UnmatchedPolicy, ValueType, VerificationMode,
};

/// Top-level configuration as read from a TOML file.
///
/// One file describes both the engine settings and the pipeline to run:
///
/// ```toml
/// [engine]
/// max_parallel = 4
/// task_timeout = "10m"
///
/// [signing]
/// mode = "key"
/// key_path = ".gantry/keys/signing.key"
///
/// [pipeline]
/// name = "release"
///
/// [task.build]
/// after = ["clone"]
///
/// [[task.build.steps]]
/// name = "compile"
/// command = "make release"
/// ```
///
/// All sections except `[pipeline]` and the tasks are optional and have
/// defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Engine behaviour from `[engine]`.
    #[serde(default)]
    pub engine: EngineSection,

    /// Signing configuration from `[signing]`.
    #[serde(default)]
    pub signing: SigningSection,

    /// Verification policy configuration from `[verification]`.
    #[serde(default)]
    pub verification: VerificationSection,

    /// The pipeline definition from `[pipeline]`.
    pub pipeline: PipelineSection,

    /// Logical workspaces from `[workspace.<name>]`.
    #[serde(default)]
    pub workspace: BTreeMap<String, WorkspaceConfig>,

    /// All tasks from `[task.<name>]`. Keys are the task names.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,

    /// Detached resource signatures from `[[signature]]` (Trusted Resources).
    #[serde(default)]
    pub signature: Vec<ResourceSignatureConfig>,
}

/// Validated configuration.
///
/// Constructed through `TryFrom<RawConfigFile>` (see `config::validate`),
/// which rejects cyclic DAGs, dangling references and malformed settings
/// before any run object exists.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub signing: SigningSection,
    pub verification: VerificationSection,
    pub pipeline: PipelineSection,
    pub workspace: BTreeMap<String, WorkspaceConfig>,
    pub task: BTreeMap<String, TaskConfig>,
    pub signature: Vec<ResourceSignatureConfig>,
}

impl ConfigFile {
    /// Internal constructor used by validation; assumes the raw config has
    /// already passed all semantic checks.
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            engine: raw.engine,
            signing: raw.signing,
            verification: raw.verification,
            pipeline: raw.pipeline,
            workspace: raw.workspace,
            task: raw.task,
            signature: raw.signature,
        }
    }

    /// The detached signature for a named resource, if one was supplied.
    pub fn signature_for(&self, resource: &str) -> Option<&ResourceSignatureConfig> {
        self.signature.iter().find(|s| s.resource == resource)
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Maximum number of tasks dispatched concurrently per pipeline run.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Wall-clock budget per task run, e.g. `"10m"`. Exceeding it forces the
    /// task run to Cancelled.
    #[serde(default)]
    pub task_timeout: Option<String>,

    /// Wall-clock budget for the whole pipeline run. Firing cancels all
    /// running children.
    #[serde(default)]
    pub pipeline_timeout: Option<String>,

    /// Storage backend for run records, attestations and signatures.
    #[serde(default)]
    pub storage: StorageMode,

    /// Root directory for embedded storage and workspaces.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Whether an unachieved isolation request fails the task or is recorded.
    #[serde(default)]
    pub isolation_enforcement: IsolationEnforcement,

    /// Builder identity embedded in attestations.
    #[serde(default = "default_builder_id")]
    pub builder_id: String,

    /// Attestation format version embedded in every provenance document.
    #[serde(default = "default_attestation_version")]
    pub attestation_version: String,
}

fn default_max_parallel() -> usize {
    4
}

fn default_storage_dir() -> String {
    ".gantry".to_string()
}

fn default_builder_id() -> String {
    "gantry/local".to_string()
}

fn default_attestation_version() -> String {
    "gantry-provenance/v1".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            task_timeout: None,
            pipeline_timeout: None,
            storage: StorageMode::default(),
            storage_dir: default_storage_dir(),
            isolation_enforcement: IsolationEnforcement::default(),
            builder_id: default_builder_id(),
            attestation_version: default_attestation_version(),
        }
    }
}

/// `[signing]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigningSection {
    /// `"key"`, `"keyless"` or `"none"`.
    #[serde(default)]
    pub mode: SignerMode,

    /// Secret reference for key mode: path to a raw 32-byte ed25519 key.
    #[serde(default)]
    pub key_path: Option<String>,

    /// Certificate authority endpoint for keyless mode.
    #[serde(default)]
    pub authority_url: Option<String>,

    /// Identity provider name recorded with keyless certificates.
    #[serde(default)]
    pub identity_provider: Option<String>,

    /// Whether signatures are submitted to the transparency log.
    #[serde(default)]
    pub transparency: bool,
}

/// `[verification]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationSection {
    /// Global verification mode; individual policies may override it.
    #[serde(default)]
    pub mode: VerificationMode,

    /// Behaviour when no policy pattern matches a resource name.
    #[serde(default)]
    pub unmatched: UnmatchedPolicy,

    /// Policies from `[[verification.policy]]`.
    #[serde(default)]
    pub policy: Vec<PolicyConfig>,
}

/// A single `[[verification.policy]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub name: String,

    /// Glob pattern matched against resource names, e.g. `"build-*"`.
    pub pattern: String,

    /// Trusted signer identities: hex key fingerprints or certificate
    /// identities.
    pub identities: Vec<String>,

    /// Per-policy mode override; falls back to `[verification].mode`.
    #[serde(default)]
    pub mode: Option<VerificationMode>,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    pub name: String,

    #[serde(default = "default_pipeline_version")]
    pub version: String,

    /// Declared parameters from `[pipeline.params.<name>]`.
    #[serde(default)]
    pub params: BTreeMap<String, ParamConfig>,

    /// Declared pipeline results: name to a
    /// `$(tasks.<task>.results.<result>)` source expression.
    #[serde(default)]
    pub results: BTreeMap<String, String>,

    /// Source references resolved into attestation materials.
    #[serde(default)]
    pub materials: Vec<MaterialConfig>,

    /// Free-form labels, usable in store selector queries.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_pipeline_version() -> String {
    "1".to_string()
}

/// A declared pipeline parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamConfig {
    /// Default value; a parameter without a default must be bound by the
    /// caller at run creation.
    #[serde(default)]
    pub default: Option<String>,

    #[serde(default, rename = "type")]
    pub value_type: ValueType,

    #[serde(default)]
    pub description: Option<String>,
}

/// A `[[pipeline.materials]]` entry: a source reference whose digest is
/// resolved at run start and embedded in attestations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub uri: String,
}

/// `[workspace.<name>]` section: a logical workspace bound to physical
/// storage when the run is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Optional host path whose contents seed the workspace at allocation.
    #[serde(default)]
    pub seed: Option<String>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Ordering dependencies: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Parameter bindings local to this task. Values may be literals,
    /// `$(params.X)` or `$(tasks.T.results.R)` expressions; result
    /// references create implicit dependency edges.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Declared results this task must produce.
    #[serde(default)]
    pub results: BTreeMap<String, ResultConfig>,

    /// Logical workspace names this task mounts.
    #[serde(default)]
    pub workspaces: Vec<String>,

    /// Gating conditions from `[[task.<name>.when]]`; if any is unsatisfied
    /// the task ends as Skipped without erroring.
    #[serde(default)]
    pub when: Vec<WhenConfig>,

    /// Ordered steps from `[[task.<name>.steps]]`.
    #[serde(default)]
    pub steps: Vec<StepConfig>,

    /// If true, a failure of this task neither fails the pipeline nor skips
    /// ordering-dependents. Result consumers are still skipped.
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Requested isolation properties from `[task.<name>.isolation]`.
    #[serde(default)]
    pub isolation: IsolationSpec,

    /// Per-task timeout override, e.g. `"90s"`.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// A declared task result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultConfig {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, rename = "type")]
    pub value_type: ValueType,
}

/// A `when` gate: compares a resolved input value against a value set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenConfig {
    /// Input expression, usually `$(params.X)` or `$(tasks.T.results.R)`.
    pub input: String,

    pub operator: WhenOperator,

    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhenOperator {
    In,
    #[serde(rename = "notin")]
    NotIn,
}

/// One execution unit inside a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,

    /// Container image contract for substrates that run containers; the
    /// local process substrate records it but executes on the host.
    #[serde(default)]
    pub image: Option<String>,

    /// Shell command to execute.
    pub command: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Requested isolation properties for a task's execution contexts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationSpec {
    /// Step processes must not be granted outbound connectivity.
    #[serde(default)]
    pub network_disabled: bool,

    /// Only explicitly mounted paths are writable.
    #[serde(default)]
    pub filesystem_read_only: bool,

    /// All dependencies are staged before execution; nothing is fetched.
    #[serde(default)]
    pub deps_prestaged: bool,
}

impl IsolationSpec {
    /// Whether any isolation property is requested at all.
    pub fn any(&self) -> bool {
        self.network_disabled || self.filesystem_read_only || self.deps_prestaged
    }
}

/// A `[[signature]]` entry: a detached signature over the canonical bytes of
/// a named task or pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSignatureConfig {
    /// Name of the signed resource (a task name or the pipeline name).
    pub resource: String,

    /// `"task"` or `"pipeline"`.
    pub kind: ResourceKind,

    /// Hex-encoded ed25519 signature over the resource's canonical bytes.
    pub signature: String,

    /// Hex-encoded ed25519 verifying key of the signer.
    pub public_key: String,

    /// Certificate chain for keyless-signed resources.
    #[serde(default)]
    pub certificate: Option<String>,
}

/// Kind of resource a signature or verification policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pipeline,
    Task,
    Artifact,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Pipeline => write!(f, "pipeline"),
            ResourceKind::Task => write!(f, "task"),
            ResourceKind::Artifact => write!(f, "artifact"),
        }
    }
}
