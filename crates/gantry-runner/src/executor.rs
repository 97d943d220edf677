//! Job executor: runs one job's concrete steps in sequence.

use crate::registry::DryRunRegistry;
use chrono::Utc;
use gantry_cache::{CacheKey, CacheManager, RestoreOutcome, SaveOutcome};
use gantry_core::events::*;
use gantry_core::plan::{ConcreteStep, StepKind};
use gantry_core::ports::{
    EventBus, ExecRequest, NullEventBus, ProcessRuntime, RegistryClient, Workspace,
};
use gantry_core::run::{CacheOutcome, JobStatus, StepReport, StepStatus, TriggerEvent};
use gantry_core::workflow::{Access, PACKAGES_CAPABILITY, Permissions};
use gantry_core::{ExecutionError, JobKey, Result, RunId};
use gantry_secrets::{Redactor, SecretScopeManager};
use gantry_trace::{WorkflowAttributes, cache_span, job_span, secret_span, step_span};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

/// Executor configuration.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub step_timeout: Option<Duration>,
    /// Directory commands run in; a step's `working_directory` is relative to it.
    pub workdir: Option<PathBuf>,
}

/// Everything the executor needs to know about one job instance.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run_id: RunId,
    pub job: JobKey,
    pub steps: Vec<ConcreteStep>,
    /// Secrets the job's steps may request.
    pub grants: BTreeSet<String>,
    pub permissions: Permissions,
    pub event: TriggerEvent,
    /// Observed at step boundaries, including the one after the last step.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub steps: Vec<StepReport>,
    pub error: Option<String>,
}

pub struct JobExecutor {
    runtime: Arc<dyn ProcessRuntime>,
    secrets: Arc<SecretScopeManager>,
    cache: Arc<CacheManager>,
    workspace: Arc<dyn Workspace>,
    registry: Arc<dyn RegistryClient>,
    events: Arc<dyn EventBus>,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        runtime: Arc<dyn ProcessRuntime>,
        secrets: Arc<SecretScopeManager>,
        cache: Arc<CacheManager>,
        workspace: Arc<dyn Workspace>,
    ) -> Self {
        Self {
            runtime,
            secrets,
            cache,
            workspace,
            registry: Arc::new(DryRunRegistry::default()),
            events: Arc::new(NullEventBus),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.events
    }

    /// Run every step of the job. Never fails: step errors become step and job status.
    pub async fn run(&self, ctx: &JobContext) -> JobOutcome {
        let attrs = WorkflowAttributes::new()
            .run(ctx.run_id.to_string())
            .job(ctx.job.as_str());

        async {
            let start = Instant::now();
            self.emit(Event::JobStarted(JobStartedPayload {
                run_id: ctx.run_id,
                job: ctx.job.clone(),
                step_count: ctx.steps.len() as u32,
                started_at: Utc::now(),
            }))
            .await;

            let mut reports = Vec::with_capacity(ctx.steps.len());
            let mut failed = false;
            let mut cancelled = false;
            let mut error = None;

            for (index, step) in ctx.steps.iter().enumerate() {
                if !cancelled && ctx.cancel.is_cancelled() {
                    info!(step = %step.name, "Job cancelled before step");
                    cancelled = true;
                }
                if cancelled || failed {
                    let mut report = StepReport::pending(&step.name);
                    report.status = if cancelled {
                        StepStatus::Cancelled
                    } else {
                        StepStatus::Skipped
                    };
                    reports.push(report);
                    continue;
                }

                let report = self.run_step(ctx, index, step, &attrs).await;
                if report.status == StepStatus::Failed && !step.continue_on_error {
                    failed = true;
                    error = report.error.clone();
                }
                reports.push(report);
            }

            // The boundary after the last step counts too.
            if !cancelled && !failed && ctx.cancel.is_cancelled() {
                info!("Job cancelled after its last step");
                cancelled = true;
            }

            let status = if cancelled {
                JobStatus::Cancelled
            } else if failed {
                JobStatus::Failed
            } else {
                JobStatus::Succeeded
            };

            info!(status = ?status, "Job finished");
            self.emit(Event::JobCompleted(JobCompletedPayload {
                run_id: ctx.run_id,
                job: ctx.job.clone(),
                status,
                duration_ms: start.elapsed().as_millis() as u64,
                completed_at: Utc::now(),
            }))
            .await;

            JobOutcome {
                status,
                steps: reports,
                error,
            }
        }
        .instrument(job_span(&attrs))
        .await
    }

    async fn run_step(
        &self,
        ctx: &JobContext,
        index: usize,
        step: &ConcreteStep,
        attrs: &WorkflowAttributes,
    ) -> StepReport {
        let span = step_span(&attrs.clone().step(&step.name));

        async {
            let start = Instant::now();
            let mut report = StepReport::pending(&step.name);
            report.status = StepStatus::Running;

            self.emit(Event::StepStarted(StepStartedPayload {
                run_id: ctx.run_id,
                job: ctx.job.clone(),
                step: step.name.clone(),
                step_index: index as u32,
                started_at: Utc::now(),
            }))
            .await;

            let cache_key = match &step.cache {
                Some(spec) => self.restore_cache(ctx, spec, &mut report).await,
                None => None,
            };

            match self.execute(ctx, step).await {
                Ok(0) => {
                    report.status = StepStatus::Succeeded;
                    report.exit_code = Some(0);
                }
                Ok(exit_code) => {
                    report.status = StepStatus::Failed;
                    report.exit_code = Some(exit_code);
                    report.error = Some(
                        ExecutionError::CommandFailed {
                            step: step.name.clone(),
                            exit_code,
                        }
                        .to_string(),
                    );
                }
                Err(e) => {
                    report.status = StepStatus::Failed;
                    report.error = Some(e.to_string());
                }
            }

            if report.status == StepStatus::Succeeded
                && report.cache != Some(CacheOutcome::Hit)
                && let (Some(spec), Some(key)) = (&step.cache, &cache_key)
            {
                self.save_cache(ctx, &spec.paths, key).await;
            }

            report.cache_key = cache_key.map(|k| k.to_string());
            report.duration_ms = start.elapsed().as_millis() as u64;

            if let Some(error) = &report.error {
                warn!(error = %error, "Step failed");
            } else {
                debug!(duration_ms = report.duration_ms, "Step succeeded");
            }

            self.emit(Event::StepCompleted(StepCompletedPayload {
                run_id: ctx.run_id,
                job: ctx.job.clone(),
                step: step.name.clone(),
                status: report.status,
                exit_code: report.exit_code,
                duration_ms: report.duration_ms,
                completed_at: Utc::now(),
            }))
            .await;

            report
        }
        .instrument(span)
        .await
    }

    /// Bind secrets, run the step, and publish its redacted output. Returns the exit code.
    async fn execute(&self, ctx: &JobContext, step: &ConcreteStep) -> Result<i32> {
        let bound = self
            .secrets
            .bind(&step.name, &step.secrets, &ctx.grants)
            .await?;

        for name in bound.names() {
            secret_span(name).in_scope(|| debug!("Secret bound"));
            self.emit(Event::SecretAccessed(SecretAccessedPayload {
                run_id: ctx.run_id,
                job: ctx.job.clone(),
                step: step.name.clone(),
                secret: name.to_string(),
                accessed_at: Utc::now(),
            }))
            .await;
        }
        let redactor = bound.redactor();

        match &step.kind {
            StepKind::Run { shell, command } => {
                let mut env = step.env.clone();
                bound.apply_to(&mut env);
                drop(bound);

                let request = ExecRequest {
                    shell: shell.clone(),
                    command: command.clone(),
                    env,
                    workdir: self.workdir(step),
                    timeout: self.config.step_timeout,
                };

                let output = self.runtime.execute(request).await.map_err(|e| {
                    ExecutionError::Runtime {
                        step: step.name.clone(),
                        message: redactor.redact(&e.to_string()),
                    }
                })?;

                for line in output.output {
                    self.forward_output(ctx, step, &redactor, line.stream, &line.content)
                        .await;
                }
                Ok(output.exit_code)
            }
            StepKind::Publish { package, access } => {
                self.publish(ctx, step, package, access).await?;
                Ok(0)
            }
        }
    }

    async fn forward_output(
        &self,
        ctx: &JobContext,
        step: &ConcreteStep,
        redactor: &Redactor,
        stream: gantry_core::ports::LogStream,
        content: &str,
    ) {
        let line = redactor.redact(content);
        info!(stream = ?stream, "{line}");
        self.emit(Event::StepOutput(StepOutputPayload {
            run_id: ctx.run_id,
            job: ctx.job.clone(),
            step: step.name.clone(),
            stream,
            line,
        }))
        .await;
    }

    /// The built-in publish action. Only tag-push runs with `packages: write` may publish.
    async fn publish(
        &self,
        ctx: &JobContext,
        step: &ConcreteStep,
        package: &str,
        access: &str,
    ) -> Result<()> {
        if !ctx.event.is_tag_push() {
            return Err(ExecutionError::PublishNotPermitted {
                step: step.name.clone(),
            }
            .into());
        }
        if !ctx.permissions.allows(PACKAGES_CAPABILITY, Access::Write) {
            return Err(ExecutionError::PermissionDenied {
                step: step.name.clone(),
                capability: PACKAGES_CAPABILITY.to_string(),
                required: Access::Write.to_string(),
            }
            .into());
        }

        let identity = self
            .registry
            .whoami()
            .await
            .map_err(|e| ExecutionError::Registry(e.to_string()))?;
        info!(package = %package, access = %access, identity = %identity, "Publishing package");
        self.registry
            .publish(package, access)
            .await
            .map_err(|e| ExecutionError::Registry(e.to_string()).into())
    }

    async fn restore_cache(
        &self,
        ctx: &JobContext,
        spec: &gantry_core::workflow::CacheSpec,
        report: &mut StepReport,
    ) -> Option<CacheKey> {
        let key = match self
            .cache
            .key(spec, self.workspace.as_ref())
            .instrument(cache_span("key", &spec.namespace))
            .await
        {
            Ok(key) => key,
            Err(e) => {
                warn!(namespace = %spec.namespace, error = %e, "Could not compute cache key, caching disabled for step");
                return None;
            }
        };

        let (outcome, size_bytes) = async {
            match self.cache.restore(&key).await {
                RestoreOutcome::Hit(bytes) => match self.workspace.restore(&bytes).await {
                    Ok(()) => (CacheOutcome::Hit, Some(bytes.len() as u64)),
                    Err(e) => {
                        warn!(error = %e, "Failed to unpack cache entry, treating as miss");
                        (CacheOutcome::Miss, None)
                    }
                },
                RestoreOutcome::Miss => (CacheOutcome::Miss, None),
            }
        }
        .instrument(cache_span("restore", key.as_str()))
        .await;

        report.cache = Some(outcome);
        self.emit(Event::CacheRestored(CacheRestoredPayload {
            run_id: ctx.run_id,
            job: ctx.job.clone(),
            key: key.to_string(),
            outcome,
            size_bytes,
        }))
        .await;
        Some(key)
    }

    async fn save_cache(&self, ctx: &JobContext, paths: &[String], key: &CacheKey) {
        async {
            let bytes = match self.workspace.snapshot(paths).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Failed to snapshot cache paths, skipping save");
                    return;
                }
            };

            let outcome = self.cache.save(key, &bytes).await;
            let (already_present, size_bytes) = match outcome {
                SaveOutcome::Stored { size_bytes } => (false, size_bytes),
                SaveOutcome::AlreadyPresent => (true, 0),
                SaveOutcome::Skipped => return,
            };

            self.emit(Event::CacheSaved(CacheSavedPayload {
                run_id: ctx.run_id,
                job: ctx.job.clone(),
                key: key.to_string(),
                already_present,
                size_bytes,
            }))
            .await;
        }
        .instrument(cache_span("save", key.as_str()))
        .await
    }

    fn workdir(&self, step: &ConcreteStep) -> Option<PathBuf> {
        match (&self.config.workdir, &step.working_directory) {
            (Some(base), Some(dir)) => Some(base.join(dir)),
            (Some(base), None) => Some(base.clone()),
            (None, Some(dir)) => Some(PathBuf::from(dir)),
            (None, None) => None,
        }
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }
}
