//! Span creation for workflow execution.

use tracing::{Level, Span, span};

/// Workflow span attributes.
#[derive(Debug, Default, Clone)]
pub struct WorkflowAttributes {
    pub workflow: Option<String>,
    pub run_id: Option<String>,
    pub parent_run_id: Option<String>,
    pub event: Option<String>,
    pub git_ref: Option<String>,
    pub job: Option<String>,
    pub step: Option<String>,
}

impl WorkflowAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow(mut self, name: impl Into<String>) -> Self {
        self.workflow = Some(name.into());
        self
    }

    pub fn run(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    pub fn parent(mut self, id: impl Into<String>) -> Self {
        self.parent_run_id = Some(id.into());
        self
    }

    pub fn trigger(mut self, event: impl Into<String>, git_ref: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self.git_ref = Some(git_ref.into());
        self
    }

    pub fn job(mut self, name: impl Into<String>) -> Self {
        self.job = Some(name.into());
        self
    }

    pub fn step(mut self, name: impl Into<String>) -> Self {
        self.step = Some(name.into());
        self
    }
}

/// Create a span for a workflow run.
pub fn run_span(attrs: &WorkflowAttributes) -> Span {
    span!(
        Level::INFO,
        "run.execute",
        workflow.name = attrs.workflow.as_deref().unwrap_or(""),
        run.id = attrs.run_id.as_deref().unwrap_or(""),
        run.parent = attrs.parent_run_id.as_deref().unwrap_or(""),
        trigger.event = attrs.event.as_deref().unwrap_or(""),
        vcs.ref = attrs.git_ref.as_deref().unwrap_or(""),
    )
}

/// Create a span for a job instance.
pub fn job_span(attrs: &WorkflowAttributes) -> Span {
    span!(
        Level::INFO,
        "job.execute",
        run.id = attrs.run_id.as_deref().unwrap_or(""),
        job.key = attrs.job.as_deref().unwrap_or(""),
    )
}

/// Create a span for a step.
pub fn step_span(attrs: &WorkflowAttributes) -> Span {
    span!(
        Level::INFO,
        "step.execute",
        run.id = attrs.run_id.as_deref().unwrap_or(""),
        job.key = attrs.job.as_deref().unwrap_or(""),
        step.name = attrs.step.as_deref().unwrap_or(""),
    )
}

/// Create a span for cache operations.
pub fn cache_span(operation: &str, key: &str) -> Span {
    span!(
        Level::DEBUG,
        "cache.operation",
        operation = operation,
        cache.key = key,
    )
}

/// Create a span for secret access. Only the secret's name is recorded.
pub fn secret_span(name: &str) -> Span {
    span!(Level::DEBUG, "secret.access", secret.name = name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_attributes_builder() {
        let attrs = WorkflowAttributes::new()
            .workflow("release")
            .run("run_456")
            .trigger("tag_push", "v1.0.0")
            .job("publish")
            .step("npm publish");

        assert_eq!(attrs.workflow.as_deref(), Some("release"));
        assert_eq!(attrs.git_ref.as_deref(), Some("v1.0.0"));
        assert_eq!(attrs.step.as_deref(), Some("npm publish"));
    }
}
