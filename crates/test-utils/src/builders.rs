#![allow(dead_code)]

use std::collections::BTreeMap;

use gantry::config::{
    ConfigFile, EngineSection, ParamConfig, PipelineSection, PolicyConfig, RawConfigFile,
    ResourceSignatureConfig, ResultConfig, SigningSection, StepConfig, TaskConfig,
    VerificationSection, WhenConfig, WhenOperator, WorkspaceConfig,
};
use gantry::types::{
    IsolationEnforcement, SignerMode, StorageMode, UnmatchedPolicy, VerificationMode,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(pipeline: &str) -> Self {
        Self {
            config: RawConfigFile {
                engine: EngineSection::default(),
                signing: SigningSection::default(),
                verification: VerificationSection::default(),
                pipeline: PipelineSection {
                    name: pipeline.to_string(),
                    version: "1".to_string(),
                    params: BTreeMap::new(),
                    results: BTreeMap::new(),
                    materials: Vec::new(),
                    labels: BTreeMap::new(),
                },
                workspace: BTreeMap::new(),
                task: BTreeMap::new(),
                signature: Vec::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_param(mut self, name: &str, default: &str) -> Self {
        self.config.pipeline.params.insert(
            name.to_string(),
            ParamConfig {
                default: Some(default.to_string()),
                ..ParamConfig::default()
            },
        );
        self
    }

    pub fn with_required_param(mut self, name: &str) -> Self {
        self.config
            .pipeline
            .params
            .insert(name.to_string(), ParamConfig::default());
        self
    }

    pub fn with_pipeline_result(mut self, name: &str, expr: &str) -> Self {
        self.config
            .pipeline
            .results
            .insert(name.to_string(), expr.to_string());
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.config
            .pipeline
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_workspace(mut self, name: &str) -> Self {
        self.config
            .workspace
            .insert(name.to_string(), WorkspaceConfig::default());
        self
    }

    pub fn with_storage(mut self, mode: StorageMode, dir: &str) -> Self {
        self.config.engine.storage = mode;
        self.config.engine.storage_dir = dir.to_string();
        self
    }

    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.config.engine.max_parallel = n;
        self
    }

    pub fn with_task_timeout(mut self, timeout: &str) -> Self {
        self.config.engine.task_timeout = Some(timeout.to_string());
        self
    }

    pub fn with_pipeline_timeout(mut self, timeout: &str) -> Self {
        self.config.engine.pipeline_timeout = Some(timeout.to_string());
        self
    }

    pub fn with_isolation_enforcement(mut self, e: IsolationEnforcement) -> Self {
        self.config.engine.isolation_enforcement = e;
        self
    }

    pub fn with_signing_mode(mut self, mode: SignerMode) -> Self {
        self.config.signing.mode = mode;
        self
    }

    pub fn with_key_path(mut self, path: &str) -> Self {
        self.config.signing.key_path = Some(path.to_string());
        self
    }

    pub fn with_authority_url(mut self, url: &str) -> Self {
        self.config.signing.authority_url = Some(url.to_string());
        self
    }

    pub fn with_transparency(mut self, enabled: bool) -> Self {
        self.config.signing.transparency = enabled;
        self
    }

    pub fn with_verification_mode(mut self, mode: VerificationMode) -> Self {
        self.config.verification.mode = mode;
        self
    }

    pub fn with_unmatched(mut self, policy: UnmatchedPolicy) -> Self {
        self.config.verification.unmatched = policy;
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.config.verification.policy.push(policy);
        self
    }

    pub fn with_signature(mut self, signature: ResourceSignatureConfig) -> Self {
        self.config.signature.push(signature);
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    /// Raw config for tests that assert validation failures.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    /// A task with a single step running the given command.
    pub fn new(cmd: &str) -> Self {
        let mut task = TaskConfig::default();
        task.steps.push(StepConfig {
            name: "main".to_string(),
            image: None,
            command: cmd.to_string(),
            env: BTreeMap::new(),
        });
        Self { task }
    }

    /// A task with no steps; add them with [`TaskConfigBuilder::step`].
    pub fn empty() -> Self {
        Self {
            task: TaskConfig::default(),
        }
    }

    pub fn step(mut self, name: &str, cmd: &str) -> Self {
        self.task.steps.push(StepConfig {
            name: name.to_string(),
            image: None,
            command: cmd.to_string(),
            env: BTreeMap::new(),
        });
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.task.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn result(mut self, name: &str) -> Self {
        self.task
            .results
            .insert(name.to_string(), ResultConfig::default());
        self
    }

    pub fn workspace(mut self, name: &str) -> Self {
        self.task.workspaces.push(name.to_string());
        self
    }

    pub fn when_in(mut self, input: &str, values: &[&str]) -> Self {
        self.task.when.push(WhenConfig {
            input: input.to_string(),
            operator: WhenOperator::In,
            values: values.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn when_not_in(mut self, input: &str, values: &[&str]) -> Self {
        self.task.when.push(WhenConfig {
            input: input.to_string(),
            operator: WhenOperator::NotIn,
            values: values.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn continue_on_failure(mut self, val: bool) -> Self {
        self.task.continue_on_failure = val;
        self
    }

    pub fn network_disabled(mut self, val: bool) -> Self {
        self.task.isolation.network_disabled = val;
        self
    }

    pub fn filesystem_read_only(mut self, val: bool) -> Self {
        self.task.isolation.filesystem_read_only = val;
        self
    }

    pub fn deps_prestaged(mut self, val: bool) -> Self {
        self.task.isolation.deps_prestaged = val;
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.task.timeout = Some(timeout.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
