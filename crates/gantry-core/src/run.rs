//! Run and execution types.

use crate::ids::{JobKey, RunId};
use crate::workflow::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source-control or manual event that may activate workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    /// Full or short ref, e.g. `refs/heads/main` or `v1.2.0`.
    pub git_ref: String,
    #[serde(default)]
    pub is_tag: bool,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    /// Cron expression that fired, for schedule events.
    #[serde(default)]
    pub schedule: Option<String>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: git_ref.into(),
            is_tag: kind == EventKind::TagPush,
            sha: None,
            actor: None,
            schedule: None,
        }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new(EventKind::Push, branch)
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self::new(EventKind::TagPush, tag)
    }

    pub fn scheduled(cron: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            schedule: Some(cron.into()),
            ..Self::new(EventKind::Schedule, branch)
        }
    }

    /// A push of a tag counts as a tag push.
    pub fn effective_kind(&self) -> EventKind {
        if self.kind == EventKind::Push && self.is_tag {
            EventKind::TagPush
        } else {
            self.kind
        }
    }

    pub fn is_tag_push(&self) -> bool {
        self.effective_kind() == EventKind::TagPush
    }

    /// The ref without its `refs/heads/` or `refs/tags/` prefix.
    pub fn short_ref(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .or_else(|| self.git_ref.strip_prefix("refs/tags/"))
            .unwrap_or(&self.git_ref)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }
}

impl From<RunStatus> for JobStatus {
    /// Status of the job that invoked a nested run.
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Succeeded => JobStatus::Succeeded,
            RunStatus::Cancelled => JobStatus::Cancelled,
            RunStatus::Queued | RunStatus::Running | RunStatus::Failed => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Cancelled | StepStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    /// A newer run in the same concurrency group took the slot.
    Superseded,
    /// A sibling matrix leg failed.
    FailFast,
    ParentCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub cache_key: Option<String>,
    pub cache: Option<CacheOutcome>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepReport {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            exit_code: None,
            cache_key: None,
            cache: None,
            error: None,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub key: JobKey,
    /// Name of the job definition this instance came from.
    pub job: String,
    pub status: JobStatus,
    pub continue_on_error: bool,
    pub steps: Vec<StepReport>,
    pub error: Option<String>,
    pub cancel_reason: Option<CancelReason>,
    /// Report of the nested run when the job delegates to a reusable workflow.
    pub nested: Option<Box<RunReport>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobReport {
    pub fn new(key: JobKey, job: impl Into<String>, continue_on_error: bool) -> Self {
        Self {
            key,
            job: job.into(),
            status: JobStatus::Pending,
            continue_on_error,
            steps: Vec::new(),
            error: None,
            cancel_reason: None,
            nested: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub parent: Option<RunId>,
    pub workflow: String,
    pub status: RunStatus,
    pub cancel_reason: Option<CancelReason>,
    pub concurrency_group: Option<String>,
    pub jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn job(&self, key: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.key.as_str() == key)
    }

    pub fn jobs_of(&self, job: &str) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(move |j| j.job == job)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let completed = self.completed_at?;
        u64::try_from((completed - self.started_at).num_milliseconds()).ok()
    }
}
