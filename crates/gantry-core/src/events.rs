//! Run progress events.
//!
//! Events never carry secret values: step output is redacted before an
//! [`Event::StepOutput`] is built, and secret access events carry only names.

use crate::ids::{FamilyId, JobKey, RunId};
use crate::ports::LogStream;
use crate::run::{CancelReason, CacheOutcome, JobStatus, RunStatus, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Run lifecycle
    RunQueued(RunQueuedPayload),
    RunStarted(RunStartedPayload),
    RunCompleted(RunCompletedPayload),
    RunCancelled(RunCancelledPayload),

    // Job lifecycle
    JobStarted(JobStartedPayload),
    JobCompleted(JobCompletedPayload),

    // Step lifecycle
    StepStarted(StepStartedPayload),
    StepOutput(StepOutputPayload),
    StepCompleted(StepCompletedPayload),

    // Cache
    CacheRestored(CacheRestoredPayload),
    CacheSaved(CacheSavedPayload),

    // Secrets
    SecretAccessed(SecretAccessedPayload),

    // Matrix
    MatrixExpanded(MatrixExpandedPayload),
}

impl Event {
    /// Dotted subject for routing and filtering, e.g. `run.started.run_…`.
    pub fn subject(&self) -> String {
        match self {
            Event::RunQueued(p) => format!("run.queued.{}", p.run_id),
            Event::RunStarted(p) => format!("run.started.{}", p.run_id),
            Event::RunCompleted(p) => format!("run.completed.{}", p.run_id),
            Event::RunCancelled(p) => format!("run.cancelled.{}", p.run_id),
            Event::JobStarted(p) => format!("run.{}.job.{}.started", p.run_id, p.job),
            Event::JobCompleted(p) => format!("run.{}.job.{}.completed", p.run_id, p.job),
            Event::StepStarted(p) => format!("run.{}.job.{}.step.started", p.run_id, p.job),
            Event::StepOutput(p) => format!("run.{}.job.{}.step.output", p.run_id, p.job),
            Event::StepCompleted(p) => format!("run.{}.job.{}.step.completed", p.run_id, p.job),
            Event::CacheRestored(p) => format!("cache.restored.{}", p.run_id),
            Event::CacheSaved(p) => format!("cache.saved.{}", p.run_id),
            Event::SecretAccessed(p) => format!("secret.accessed.{}", p.run_id),
            Event::MatrixExpanded(p) => format!("matrix.expanded.{}", p.run_id),
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            Event::RunQueued(p) => p.run_id,
            Event::RunStarted(p) => p.run_id,
            Event::RunCompleted(p) => p.run_id,
            Event::RunCancelled(p) => p.run_id,
            Event::JobStarted(p) => p.run_id,
            Event::JobCompleted(p) => p.run_id,
            Event::StepStarted(p) => p.run_id,
            Event::StepOutput(p) => p.run_id,
            Event::StepCompleted(p) => p.run_id,
            Event::CacheRestored(p) => p.run_id,
            Event::CacheSaved(p) => p.run_id,
            Event::SecretAccessed(p) => p.run_id,
            Event::MatrixExpanded(p) => p.run_id,
        }
    }
}

// === Run Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunQueuedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub concurrency_group: String,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub parent: Option<RunId>,
    pub workflow: String,
    pub job_count: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub status: RunStatus,
    pub jobs_succeeded: u32,
    pub jobs_failed: u32,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCancelledPayload {
    pub run_id: RunId,
    pub reason: CancelReason,
    pub cancelled_at: DateTime<Utc>,
}

// === Job Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub step_count: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub status: JobStatus,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

// === Step Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub step: String,
    pub step_index: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutputPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub step: String,
    pub stream: LogStream,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub step: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

// === Cache Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRestoredPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub key: String,
    pub outcome: CacheOutcome,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSavedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub key: String,
    pub already_present: bool,
    pub size_bytes: u64,
}

// === Secret Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretAccessedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub step: String,
    pub secret: String,
    pub accessed_at: DateTime<Utc>,
}

// === Matrix Payloads ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixExpandedPayload {
    pub run_id: RunId,
    pub family: FamilyId,
    pub job: String,
    pub legs: Vec<JobKey>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}
