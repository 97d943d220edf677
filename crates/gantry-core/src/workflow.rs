//! Workflow definition types.
//!
//! These types represent a user-authored workflow as loaded from YAML or JSON.
//! They are immutable once loaded; planning produces separate concrete types.

use crate::error::DefinitionError;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

/// Name of the built-in action that publishes a package through the registry client.
pub const PUBLISH_ACTION: &str = "gantry/publish";

/// Permission capability required by [`PUBLISH_ACTION`].
pub const PACKAGES_CAPABILITY: &str = "packages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyPolicy>,
    /// Inputs accepted when this workflow is invoked as a reusable workflow.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    /// Secrets a caller must forward when invoking this workflow.
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub defaults: Defaults,
    pub jobs: BTreeMap<String, JobDefinition>,
}

fn default_version() -> String {
    "1".to_string()
}

impl WorkflowDefinition {
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.get(name)
    }

    /// Every secret name the definition mentions, which is the secret scope of a
    /// top-level run of this workflow.
    pub fn mentioned_secrets(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.secrets.iter().cloned().collect();
        for job in self.jobs.values() {
            if let SecretGrant::Names(granted) = &job.secrets {
                names.extend(granted.iter().cloned());
            }
            for step in &job.steps {
                names.extend(step.secrets.iter().cloned());
            }
        }
        names
    }

    pub fn shell_default(&self) -> Option<&str> {
        self.defaults.shell.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Defaults {
    #[serde(default)]
    pub shell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    pub event: EventKind,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cron: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    TagPush,
    Manual,
    Schedule,
    WorkflowCall,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::TagPush => "tag_push",
            EventKind::Manual => "manual",
            EventKind::Schedule => "schedule",
            EventKind::WorkflowCall => "workflow_call",
        };
        f.write_str(name)
    }
}

/// Access level granted for a capability. Ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    None,
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Access::None => "none",
            Access::Read => "read",
            Access::Write => "write",
        };
        f.write_str(name)
    }
}

/// Capability → access map. Capabilities that are not listed have no access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, Access>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: impl Into<String>, access: Access) -> Self {
        self.0.insert(capability.into(), access);
        self
    }

    pub fn level(&self, capability: &str) -> Access {
        self.0.get(capability).copied().unwrap_or_default()
    }

    pub fn allows(&self, capability: &str, required: Access) -> bool {
        self.level(capability) >= required
    }

    /// Effective permissions of a job: its own entries override the workflow's.
    pub fn elevated_by(&self, job: Option<&Permissions>) -> Permissions {
        let mut merged = self.clone();
        if let Some(job) = job {
            for (capability, access) in &job.0 {
                merged.0.insert(capability.clone(), *access);
            }
        }
        merged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConcurrencyPolicy {
    /// Group key template, e.g. `deploy-${{ ref }}`.
    pub group: String,
    #[serde(default)]
    pub cancel_in_progress: bool,
}

impl ConcurrencyPolicy {
    pub fn mode(&self) -> ConcurrencyMode {
        if self.cancel_in_progress {
            ConcurrencyMode::CancelInProgress
        } else {
            ConcurrencyMode::Queue
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    CancelInProgress,
    Queue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputSpec {
    #[serde(rename = "type", default)]
    pub kind: InputKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    #[default]
    String,
    Boolean,
    Number,
}

impl InputKind {
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            InputKind::String => value.is_string(),
            InputKind::Boolean => value.is_boolean(),
            InputKind::Number => value.is_number(),
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputKind::String => "string",
            InputKind::Boolean => "boolean",
            InputKind::Number => "number",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub runs_on: Option<String>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub matrix: Option<MatrixSpec>,
    /// Reusable workflow reference, `path@version`.
    #[serde(default)]
    pub uses: Option<String>,
    /// Input bindings for a reusable workflow.
    #[serde(default)]
    pub with: BTreeMap<String, serde_json::Value>,
    /// Secrets granted to the job's steps, or forwarded to a reusable workflow.
    #[serde(default)]
    pub secrets: SecretGrant,
    #[serde(default)]
    pub permissions: Option<Permissions>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub tolerate_failed_needs: bool,
}

impl JobDefinition {
    pub fn delegates(&self) -> bool {
        self.uses.is_some()
    }

    pub fn fail_fast(&self) -> bool {
        self.matrix.as_ref().is_none_or(|m| m.fail_fast)
    }

    /// The reusable workflow this job delegates to, if any.
    pub fn reusable_ref(&self) -> Option<Result<ReusableWorkflowRef, DefinitionError>> {
        let reference = self.uses.as_deref()?;
        Some(VersionedRef::parse_pinned(reference).map(|target| ReusableWorkflowRef {
            target,
            with: self.with.clone(),
            secrets: self.secrets.inheritance(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InheritMode {
    Inherit,
}

/// Secret grant on a job: either `inherit` or an explicit list of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SecretGrant {
    Mode(InheritMode),
    Names(Vec<String>),
}

impl Default for SecretGrant {
    fn default() -> Self {
        SecretGrant::Names(Vec::new())
    }
}

impl SecretGrant {
    pub fn inheritance(&self) -> SecretInheritance {
        match self {
            SecretGrant::Mode(InheritMode::Inherit) => SecretInheritance::InheritAll,
            SecretGrant::Names(names) => {
                SecretInheritance::Explicit(names.iter().cloned().collect())
            }
        }
    }

    /// Resolve the grant against the secret scope available to the run.
    pub fn resolve(&self, available: &BTreeSet<String>) -> BTreeSet<String> {
        match self {
            SecretGrant::Mode(InheritMode::Inherit) => available.clone(),
            SecretGrant::Names(names) => names.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretInheritance {
    InheritAll,
    Explicit(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub with: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Secrets this step needs. Only these are bound into its environment.
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub cache: Option<CacheSpec>,
}

/// Borrowed view of what a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction<'a> {
    Run {
        command: &'a str,
        shell: Option<&'a str>,
    },
    Uses {
        reference: &'a str,
        with: &'a BTreeMap<String, String>,
    },
}

impl StepDefinition {
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: Some(command.into()),
            shell: None,
            uses: None,
            with: BTreeMap::new(),
            env: BTreeMap::new(),
            secrets: Vec::new(),
            working_directory: None,
            continue_on_error: false,
            cache: None,
        }
    }

    pub fn uses(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            run: None,
            uses: Some(reference.into()),
            ..Self::run(name, "")
        }
    }

    /// `None` when the step has both or neither of `run` and `uses`.
    pub fn action(&self) -> Option<StepAction<'_>> {
        match (&self.run, &self.uses) {
            (Some(command), None) => Some(StepAction::Run {
                command,
                shell: self.shell.as_deref(),
            }),
            (None, Some(reference)) => Some(StepAction::Uses {
                reference,
                with: &self.with,
            }),
            _ => None,
        }
    }

    pub fn is_publish(&self) -> bool {
        self.uses.as_deref() == Some(PUBLISH_ACTION)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheSpec {
    /// Namespace prefix of the cache key, e.g. `npm`.
    pub namespace: String,
    /// Files whose content fingerprints the cache, e.g. a lockfile.
    pub manifest: Vec<String>,
    /// Paths restored before the step and saved after it succeeds.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatrixSpec {
    pub axes: BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub include: Vec<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub exclude: Vec<BTreeMap<String, serde_json::Value>>,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// A named, versioned bundle of steps inlined wherever it is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositeAction {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, ActionInput>,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionInput {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

static IMMUTABLE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(v\d+(\.\d+){0,2}|\d+\.\d+\.\d+|[0-9a-f]{40})$").expect("valid version regex")
});

/// `(path, version)` address of a workflow or composite action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionedRef {
    pub path: String,
    pub version: String,
}

impl VersionedRef {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    /// Parse `path@version`. Returns `None` when either half is missing.
    pub fn parse(reference: &str) -> Option<Self> {
        let (path, version) = reference.rsplit_once('@')?;
        if path.is_empty() || version.is_empty() {
            return None;
        }
        Some(Self::new(path, version))
    }

    /// Parse `path@version`, rejecting versions that can move (branches, `latest`, ...).
    pub fn parse_pinned(reference: &str) -> Result<Self, DefinitionError> {
        match Self::parse(reference) {
            Some(parsed) if parsed.is_immutable() => Ok(parsed),
            _ => Err(DefinitionError::MovingReference {
                reference: reference.to_string(),
            }),
        }
    }

    pub fn is_immutable(&self) -> bool {
        IMMUTABLE_VERSION.is_match(&self.version)
    }
}

impl fmt::Display for VersionedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}

/// A job's delegation to a reusable workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct ReusableWorkflowRef {
    pub target: VersionedRef,
    pub with: BTreeMap<String, serde_json::Value>,
    pub secrets: SecretInheritance,
}
