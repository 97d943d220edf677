//! Error types for Gantry.
//!
//! Each failure class has its own enum so callers can decide how far it
//! propagates: a [`DefinitionError`] blocks run creation, a
//! [`ResolutionError`] or [`InvocationError`] fails only the job that made the
//! reference, an [`ExecutionError`] fails the job unless it is tolerated, and a
//! [`CacheError`] degrades to a cache miss.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Failed to parse workflow definition: {0}")]
    Parse(String),

    #[error("{location}: missing required field `{field}`")]
    MissingRequiredField { location: String, field: String },

    #[error("{location}: unknown reference `{reference}`")]
    UnknownReference { location: String, reference: String },

    #[error("Cycle detected in job dependencies involving `{job}`")]
    CyclicDependency { job: String },

    #[error("Job `{job}` both owns steps and delegates to a reusable workflow")]
    ConflictingJobShape { job: String },

    #[error("{location}: a step must have exactly one of `run` or `uses`")]
    ConflictingStepShape { location: String },

    #[error("Reference `{reference}` is not pinned to an immutable version")]
    MovingReference { reference: String },

    #[error("Job instance `{key}` is produced more than once")]
    DuplicateJobKey { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("Action not found: {reference}")]
    ActionNotFound { reference: String },

    #[error("Step `{step}` in action `{action}` does not declare a shell")]
    ShellNotDeclared { action: String, step: String },

    #[error("Input `{input}` of action `{action}`: {reason}")]
    InputMismatch {
        action: String,
        input: String,
        reason: String,
    },

    #[error("Step `{step}` needs secret `{secret}` which the job is not granted")]
    SecretOutOfScope { step: String, secret: String },

    #[error("Action `{reference}` exceeds the composite nesting limit of {limit}")]
    NestingTooDeep { reference: String, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("Workflow `{path}` has no version `{version}`")]
    VersionNotFound { path: String, version: String },

    #[error("Workflow `{workflow}` requires input `{input}`")]
    RequiredInputMissing { workflow: String, input: String },

    #[error("Input `{input}` of workflow `{workflow}` must be a {expected}")]
    InputTypeMismatch {
        workflow: String,
        input: String,
        expected: String,
    },

    #[error("Workflow `{workflow}` does not declare input `{input}`")]
    UnexpectedInput { workflow: String, input: String },

    #[error("Secret `{secret}` is not available to workflow `{workflow}`")]
    SecretNotInherited { workflow: String, secret: String },

    #[error("Workflow `{workflow}` exceeds the invocation nesting limit of {limit}")]
    NestingTooDeep { workflow: String, limit: usize },

    #[error("Workflow `{workflow}` invokes itself")]
    RecursiveInvocation { workflow: String },

    #[error("`{reference}` is already published with different content")]
    AlreadyPublished { reference: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Step `{step}` failed with exit code {exit_code}")]
    CommandFailed { step: String, exit_code: i32 },

    #[error("Step `{step}` could not be executed: {message}")]
    Runtime { step: String, message: String },

    #[error("Step `{step}` may only publish from a tag-push run")]
    PublishNotPermitted { step: String },

    #[error("Step `{step}` requires `{capability}: {required}` permission")]
    PermissionDenied {
        step: String,
        capability: String,
        required: String,
    },

    #[error("Registry error: {0}")]
    Registry(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Cache store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Cache entry corrupt: {0}")]
    Corrupt(String),

    #[error("Cache workspace error: {0}")]
    Workspace(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
