//! DAG execution of a run plan.
//!
//! Every job instance runs on its own tokio task. Step-owning jobs take a
//! permit from a semaphore shared by all runs of the engine; nested runs do
//! not, so a caller never deadlocks waiting on its own callee. Matrix legs
//! are additionally bounded by their family's `max_parallel`.

use crate::cancel::RunCancellation;
use crate::dag::JobGraph;
use crate::plan::{JobWork, PlannedJob, RunPlan};
use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use gantry_core::events::*;
use gantry_core::run::{CancelReason, JobReport, JobStatus, RunReport, RunStatus, TriggerEvent};
use gantry_core::{FamilyId, JobKey, RunId};
use gantry_runner::{JobContext, JobExecutor, JobOutcome};
use gantry_trace::{WorkflowAttributes, run_span};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// A planned run ready to execute.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub parent: Option<RunId>,
    pub plan: RunPlan,
    pub event: TriggerEvent,
    pub cancel: RunCancellation,
}

impl RunRequest {
    pub fn new(plan: RunPlan, event: TriggerEvent) -> Self {
        Self {
            run_id: RunId::new(),
            parent: None,
            plan,
            event,
            cancel: RunCancellation::new(),
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    executor: Arc<JobExecutor>,
    permits: Arc<Semaphore>,
}

struct FamilyState {
    token: CancellationToken,
    fail_fast: bool,
    max_parallel: Option<usize>,
    running: usize,
    failed: bool,
}

/// What a finished job task hands back to the run loop.
struct JobResult {
    index: usize,
    outcome: JobOutcome,
    nested: Option<RunReport>,
}

impl Scheduler {
    /// `parallelism` caps concurrently running step-owning jobs across all runs.
    pub fn new(executor: Arc<JobExecutor>, parallelism: usize) -> Self {
        Self {
            executor,
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.executor
    }

    /// Run every job of the plan to a terminal state.
    pub fn schedule(&self, request: RunRequest) -> BoxFuture<'static, RunReport> {
        let this = self.clone();
        async move { this.execute(request).await }.boxed()
    }

    async fn execute(self, request: RunRequest) -> RunReport {
        let mut attrs = WorkflowAttributes::new()
            .workflow(&request.plan.workflow)
            .run(request.run_id.to_string())
            .trigger(
                request.event.effective_kind().to_string(),
                request.event.short_ref(),
            );
        if let Some(parent) = request.parent {
            attrs = attrs.parent(parent.to_string());
        }
        let span = run_span(&attrs);
        self.drive(request).instrument(span).await
    }

    async fn drive(self, request: RunRequest) -> RunReport {
        let RunRequest {
            run_id,
            parent,
            plan,
            event,
            cancel,
        } = request;
        let plan = Arc::new(plan);
        let started_at = Utc::now();
        let mut report = RunReport {
            run_id,
            parent,
            workflow: plan.workflow.clone(),
            status: RunStatus::Running,
            cancel_reason: None,
            concurrency_group: plan.concurrency_group().map(str::to_string),
            jobs: plan
                .jobs
                .iter()
                .map(|j| JobReport::new(j.key.clone(), &j.job, j.continue_on_error))
                .collect(),
            started_at,
            completed_at: None,
        };

        info!(run_id = %run_id, workflow = %plan.workflow, jobs = plan.jobs.len(), "Run started");
        self.emit(Event::RunStarted(RunStartedPayload {
            run_id,
            parent,
            workflow: plan.workflow.clone(),
            job_count: plan.jobs.len() as u32,
            started_at,
        }))
        .await;

        let graph = match JobGraph::build(&plan) {
            Ok(graph) => graph,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run plan is not a DAG");
                for job in &mut report.jobs {
                    job.status = JobStatus::Skipped;
                    job.error = Some(e.to_string());
                }
                return self.finish(report, &cancel).await;
            }
        };

        let mut families: HashMap<FamilyId, FamilyState> = HashMap::new();
        for family in &plan.families {
            families.insert(
                family.id,
                FamilyState {
                    token: cancel.token().child_token(),
                    fail_fast: family.fail_fast,
                    max_parallel: family.max_parallel.map(|n| (n as usize).max(1)),
                    running: 0,
                    failed: false,
                },
            );
            self.emit(Event::MatrixExpanded(MatrixExpandedPayload {
                run_id,
                family: family.id,
                job: family.job.clone(),
                legs: family.legs.clone(),
                fail_fast: family.fail_fast,
                max_parallel: family.max_parallel,
            }))
            .await;
        }

        let position: HashMap<&JobKey, usize> = plan
            .jobs
            .iter()
            .enumerate()
            .map(|(i, j)| (&j.key, i))
            .collect();
        let upstream: Vec<Vec<usize>> = plan
            .jobs
            .iter()
            .map(|j| {
                graph
                    .predecessors(&j.key)
                    .into_iter()
                    .filter_map(|k| position.get(k).copied())
                    .collect()
            })
            .collect();

        let mut pending: Vec<usize> = (0..plan.jobs.len()).collect();
        let mut tasks: JoinSet<JobResult> = JoinSet::new();
        let mut task_jobs: HashMap<Id, usize> = HashMap::new();
        let mut run_cancel_seen = false;

        loop {
            // Settle every pending job that can be decided now.
            let mut progressed = true;
            while progressed {
                progressed = false;
                let mut still_pending = Vec::with_capacity(pending.len());
                for index in pending.drain(..) {
                    let job = &plan.jobs[index];
                    let family = job.family.and_then(|id| families.get(&id));

                    if cancel.is_cancelled() {
                        let reason = cancel.reason();
                        self.settle(&mut report, run_id, index, JobStatus::Cancelled, reason, None)
                            .await;
                        progressed = true;
                        continue;
                    }
                    if family.is_some_and(|f| f.failed && f.fail_fast) {
                        self.settle(
                            &mut report,
                            run_id,
                            index,
                            JobStatus::Cancelled,
                            Some(CancelReason::FailFast),
                            None,
                        )
                        .await;
                        progressed = true;
                        continue;
                    }

                    let statuses: Vec<&JobReport> =
                        upstream[index].iter().map(|&u| &report.jobs[u]).collect();
                    if statuses.iter().any(|r| !r.status.is_terminal()) {
                        still_pending.push(index);
                        continue;
                    }
                    let satisfied = statuses.iter().all(|r| {
                        r.status == JobStatus::Succeeded
                            || (r.status == JobStatus::Failed && r.continue_on_error)
                    });
                    if !satisfied && !job.tolerate_failed_needs {
                        debug!(job = %job.key, "Upstream did not succeed; skipping");
                        self.settle(&mut report, run_id, index, JobStatus::Skipped, None, None)
                            .await;
                        progressed = true;
                        continue;
                    }

                    if let JobWork::Unresolvable { error } = &job.work {
                        let error = error.clone();
                        self.settle(&mut report, run_id, index, JobStatus::Failed, None, Some(error))
                            .await;
                        if !job.continue_on_error
                            && let Some(state) = job.family.and_then(|id| families.get_mut(&id))
                        {
                            fail_family(state, &job.key);
                        }
                        progressed = true;
                        continue;
                    }

                    if family.is_some_and(|f| f.max_parallel.is_some_and(|max| f.running >= max)) {
                        still_pending.push(index);
                        continue;
                    }

                    let token = match job.family.and_then(|id| families.get_mut(&id)) {
                        Some(state) => {
                            state.running += 1;
                            state.token.child_token()
                        }
                        None => cancel.token().child_token(),
                    };
                    report.jobs[index].status = JobStatus::Running;
                    report.jobs[index].started_at = Some(Utc::now());
                    let handle = tasks.spawn(self.clone().run_job(
                        index,
                        run_id,
                        plan.clone(),
                        event.clone(),
                        token,
                    ));
                    task_jobs.insert(handle.id(), index);
                    progressed = true;
                }
                pending = still_pending;
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    let result = match joined {
                        Ok((id, result)) => {
                            task_jobs.remove(&id);
                            result
                        }
                        Err(e) => {
                            let Some(index) = task_jobs.remove(&e.id()) else {
                                continue;
                            };
                            error!(job = %plan.jobs[index].key, error = %e, "Job task aborted");
                            JobResult {
                                index,
                                outcome: JobOutcome {
                                    status: JobStatus::Failed,
                                    steps: Vec::new(),
                                    error: Some(format!("job task aborted: {e}")),
                                },
                                nested: None,
                            }
                        }
                    };
                    self.complete(&mut report, &plan, &mut families, &cancel, result);
                }
                _ = cancel.token().cancelled(), if !run_cancel_seen => {
                    run_cancel_seen = true;
                    info!(run_id = %run_id, reason = ?cancel.reason(), "Run cancellation requested");
                }
            }
        }

        for index in pending {
            warn!(job = %plan.jobs[index].key, "Job never became eligible");
            self.settle(&mut report, run_id, index, JobStatus::Skipped, None, None)
                .await;
        }

        self.finish(report, &cancel).await
    }

    /// Body of one job task.
    async fn run_job(
        self,
        index: usize,
        run_id: RunId,
        plan: Arc<RunPlan>,
        event: TriggerEvent,
        token: CancellationToken,
    ) -> JobResult {
        let job: &PlannedJob = &plan.jobs[index];
        match &job.work {
            JobWork::Steps {
                steps,
                grants,
                permissions,
                ..
            } => {
                let permit = tokio::select! {
                    permit = self.permits.clone().acquire_owned() => permit.ok(),
                    _ = token.cancelled() => None,
                };
                if permit.is_none() {
                    return JobResult {
                        index,
                        outcome: JobOutcome {
                            status: JobStatus::Cancelled,
                            steps: Vec::new(),
                            error: None,
                        },
                        nested: None,
                    };
                }
                let ctx = JobContext {
                    run_id,
                    job: job.key.clone(),
                    steps: steps.clone(),
                    grants: grants.clone(),
                    permissions: permissions.clone(),
                    event,
                    cancel: token,
                };
                let outcome = self.executor.run(&ctx).await;
                drop(permit);
                JobResult {
                    index,
                    outcome,
                    nested: None,
                }
            }
            JobWork::Nested { plan: nested } => {
                self.emit(Event::JobStarted(JobStartedPayload {
                    run_id,
                    job: job.key.clone(),
                    step_count: 0,
                    started_at: Utc::now(),
                }))
                .await;
                let request = RunRequest {
                    run_id: RunId::new(),
                    parent: Some(run_id),
                    plan: nested.as_ref().clone(),
                    event,
                    cancel: RunCancellation::child_of(&token),
                };
                let nested_report = self.schedule(request).await;
                let status = JobStatus::from(nested_report.status);
                let error = (status == JobStatus::Failed)
                    .then(|| format!("Nested run of `{}` failed", nested_report.workflow));
                self.emit(job_completed(run_id, &job.key, status, nested_report.duration_ms()))
                    .await;
                JobResult {
                    index,
                    outcome: JobOutcome {
                        status,
                        steps: Vec::new(),
                        error,
                    },
                    nested: Some(nested_report),
                }
            }
            JobWork::Unresolvable { error } => JobResult {
                index,
                outcome: JobOutcome {
                    status: JobStatus::Failed,
                    steps: Vec::new(),
                    error: Some(error.clone()),
                },
                nested: None,
            },
        }
    }

    fn complete(
        &self,
        report: &mut RunReport,
        plan: &RunPlan,
        families: &mut HashMap<FamilyId, FamilyState>,
        cancel: &RunCancellation,
        result: JobResult,
    ) {
        let job = &plan.jobs[result.index];
        let family = job.family.and_then(|id| families.get_mut(&id));

        let entry = &mut report.jobs[result.index];
        entry.status = result.outcome.status;
        // A job that had not failed by the time its family or run was
        // cancelled is reported as cancelled, even if its steps all ran.
        let family_cancelled = family.as_ref().is_some_and(|f| f.failed && f.fail_fast);
        if entry.status == JobStatus::Succeeded && (family_cancelled || cancel.is_cancelled()) {
            entry.status = JobStatus::Cancelled;
        }
        entry.steps = result.outcome.steps;
        entry.error = result.outcome.error;
        entry.nested = result.nested.map(Box::new);
        entry.completed_at = Some(Utc::now());

        if let Some(state) = family {
            state.running = state.running.saturating_sub(1);
            if entry.status == JobStatus::Cancelled && state.failed && state.fail_fast {
                entry.cancel_reason = Some(CancelReason::FailFast);
            }
            if entry.status == JobStatus::Failed && !job.continue_on_error {
                fail_family(state, &job.key);
            }
        }
        if entry.status == JobStatus::Cancelled && entry.cancel_reason.is_none() {
            entry.cancel_reason = cancel.reason();
        }
        debug!(job = %job.key, status = ?entry.status, "Job finished");
    }

    /// Give a job that never started its terminal status.
    async fn settle(
        &self,
        report: &mut RunReport,
        run_id: RunId,
        index: usize,
        status: JobStatus,
        reason: Option<CancelReason>,
        error: Option<String>,
    ) {
        let entry = &mut report.jobs[index];
        entry.status = status;
        entry.cancel_reason = reason;
        entry.error = error;
        entry.completed_at = Some(Utc::now());
        self.emit(job_completed(run_id, &entry.key, status, Some(0)))
            .await;
    }

    async fn finish(&self, mut report: RunReport, cancel: &RunCancellation) -> RunReport {
        let completed_at = Utc::now();
        report.completed_at = Some(completed_at);
        report.status = if cancel.is_cancelled() {
            report.cancel_reason = cancel.reason();
            RunStatus::Cancelled
        } else if report
            .jobs
            .iter()
            .any(|j| j.status == JobStatus::Failed && !j.continue_on_error)
        {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        if let Some(reason) = report.cancel_reason {
            self.emit(Event::RunCancelled(RunCancelledPayload {
                run_id: report.run_id,
                reason,
                cancelled_at: completed_at,
            }))
            .await;
        }
        self.emit(Event::RunCompleted(RunCompletedPayload {
            run_id: report.run_id,
            workflow: report.workflow.clone(),
            status: report.status,
            jobs_succeeded: report.count(JobStatus::Succeeded) as u32,
            jobs_failed: report.count(JobStatus::Failed) as u32,
            duration_ms: report.duration_ms().unwrap_or_default(),
            completed_at,
        }))
        .await;

        info!(
            run_id = %report.run_id,
            workflow = %report.workflow,
            status = ?report.status,
            succeeded = report.count(JobStatus::Succeeded),
            failed = report.count(JobStatus::Failed),
            skipped = report.count(JobStatus::Skipped),
            cancelled = report.count(JobStatus::Cancelled),
            "Run completed"
        );
        report
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.executor.events().publish(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }
}

fn fail_family(state: &mut FamilyState, leg: &JobKey) {
    state.failed = true;
    if state.fail_fast {
        info!(leg = %leg, "Matrix leg failed; cancelling siblings");
        state.token.cancel();
    }
}

fn job_completed(run_id: RunId, job: &JobKey, status: JobStatus, duration_ms: Option<u64>) -> Event {
    Event::JobCompleted(JobCompletedPayload {
        run_id,
        job: job.clone(),
        status,
        duration_ms: duration_ms.unwrap_or_default(),
        completed_at: Utc::now(),
    })
}

/// Report for a run cancelled before it started, e.g. while queued.
pub fn cancelled_report(
    run_id: RunId,
    parent: Option<RunId>,
    plan: &RunPlan,
    reason: CancelReason,
) -> RunReport {
    let now = Utc::now();
    RunReport {
        run_id,
        parent,
        workflow: plan.workflow.clone(),
        status: RunStatus::Cancelled,
        cancel_reason: Some(reason),
        concurrency_group: plan.concurrency_group().map(str::to_string),
        jobs: plan
            .jobs
            .iter()
            .map(|j| {
                let mut report = JobReport::new(j.key.clone(), &j.job, j.continue_on_error);
                report.status = JobStatus::Cancelled;
                report.cancel_reason = Some(reason);
                report
            })
            .collect(),
        started_at: now,
        completed_at: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::plan::{Planner, PlannerConfig};
    use async_trait::async_trait;
    use gantry_cache::{CacheManager, MemoryStore};
    use gantry_core::Result;
    use gantry_core::loader::load_str;
    use gantry_core::ports::{ExecOutput, ExecRequest, OutputLine, ProcessRuntime};
    use gantry_runner::FsWorkspace;
    use gantry_secrets::{FileVault, SecretScopeManager};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails commands containing `fail`, sleeps for commands `sleep <ms>`.
    #[derive(Default)]
    struct ScriptRuntime {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProcessRuntime for ScriptRuntime {
        async fn execute(&self, request: ExecRequest) -> Result<ExecOutput> {
            self.commands.lock().unwrap().push(request.command.clone());
            if let Some(ms) = request.command.strip_prefix("sleep ") {
                tokio::time::sleep(Duration::from_millis(ms.parse().unwrap_or(0))).await;
            }
            let exit_code = if request.command.contains("fail") { 1 } else { 0 };
            Ok(ExecOutput {
                exit_code,
                output: vec![OutputLine::stdout(request.command)],
            })
        }
    }

    struct Harness {
        runtime: Arc<ScriptRuntime>,
        scheduler: Scheduler,
        _dir: tempfile::TempDir,
    }

    fn harness(parallelism: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(ScriptRuntime::default());
        let executor = JobExecutor::new(
            runtime.clone(),
            Arc::new(SecretScopeManager::new(Arc::new(FileVault::from_map(
                Default::default(),
            )))),
            Arc::new(CacheManager::new(Arc::new(MemoryStore::new()))),
            Arc::new(FsWorkspace::new(dir.path())),
        );
        Harness {
            runtime,
            scheduler: Scheduler::new(Arc::new(executor), parallelism),
            _dir: dir,
        }
    }

    fn plan(source: &str) -> RunPlan {
        let catalog = Catalog::new();
        Planner::new(&catalog, PlannerConfig::default())
            .plan(&load_str(source).unwrap(), &TriggerEvent::push("main"))
            .unwrap()
    }

    fn request(source: &str) -> RunRequest {
        RunRequest::new(plan(source), TriggerEvent::push("main"))
    }

    #[tokio::test]
    async fn test_failed_upstream_skips_dependents() {
        let h = harness(4);
        let report = h
            .scheduler
            .schedule(request(
                r#"
name: ci
jobs:
  test:
    runs_on: linux
    steps: [{name: test, run: npm test --fail}]
  build:
    runs_on: linux
    needs: [test]
    steps: [{name: build, run: npm run build}]
"#,
            ))
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.job("test").unwrap().status, JobStatus::Failed);
        assert_eq!(report.job("build").unwrap().status, JobStatus::Skipped);
        assert_eq!(*h.runtime.commands.lock().unwrap(), vec!["npm test --fail"]);
    }

    #[tokio::test]
    async fn test_tolerant_job_runs_after_failure() {
        let h = harness(4);
        let report = h
            .scheduler
            .schedule(request(
                r#"
name: ci
jobs:
  test:
    runs_on: linux
    steps: [{name: test, run: fail}]
  report:
    runs_on: linux
    needs: [test]
    tolerate_failed_needs: true
    steps: [{name: upload, run: upload-results}]
"#,
            ))
            .await;
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.job("report").unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_continue_on_error_job_does_not_fail_run() {
        let h = harness(4);
        let report = h
            .scheduler
            .schedule(request(
                r#"
name: ci
jobs:
  lint:
    runs_on: linux
    continue_on_error: true
    steps: [{name: lint, run: fail}]
  build:
    runs_on: linux
    needs: [lint]
    steps: [{name: build, run: make}]
"#,
            ))
            .await;
        assert_eq!(report.job("lint").unwrap().status, JobStatus::Failed);
        assert_eq!(report.job("build").unwrap().status, JobStatus::Succeeded);
        assert_eq!(report.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_pending_legs() {
        let h = harness(4);
        let report = h
            .scheduler
            .schedule(request(
                r#"
name: ci
jobs:
  test:
    runs_on: linux
    matrix:
      axes:
        shard: [fail, a, b, c]
      fail_fast: true
      max_parallel: 1
    steps: [{name: test, run: "${{ matrix.shard }}"}]
"#,
            ))
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.count(JobStatus::Failed), 1);
        assert_eq!(report.count(JobStatus::Cancelled), 3);
        assert!(report
            .jobs_of("test")
            .filter(|j| j.status == JobStatus::Cancelled)
            .all(|j| j.cancel_reason == Some(CancelReason::FailFast)));
        assert_eq!(h.runtime.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_a_leg_in_its_last_step() {
        let h = harness(4);
        let report = h
            .scheduler
            .schedule(request(
                r#"
name: ci
jobs:
  test:
    runs_on: linux
    matrix:
      axes:
        shard: [fail, "sleep 200"]
      fail_fast: true
    steps: [{name: test, run: "${{ matrix.shard }}"}]
"#,
            ))
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.job("test (shard=fail)").unwrap().status, JobStatus::Failed);
        let slow = report.job("test (shard=sleep 200)").unwrap();
        assert_eq!(slow.status, JobStatus::Cancelled);
        assert_eq!(slow.cancel_reason, Some(CancelReason::FailFast));
        assert_eq!(h.runtime.commands.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_without_fail_fast_every_leg_runs() {
        let h = harness(4);
        let report = h
            .scheduler
            .schedule(request(
                r#"
name: ci
jobs:
  test:
    runs_on: linux
    matrix:
      axes:
        shard: [fail, a, b]
      fail_fast: false
    steps: [{name: test, run: "${{ matrix.shard }}"}]
"#,
            ))
            .await;
        assert_eq!(report.count(JobStatus::Failed), 1);
        assert_eq!(report.count(JobStatus::Succeeded), 2);
        assert_eq!(h.runtime.commands.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_run_cancellation() {
        let h = harness(4);
        let request = request(
            r#"
name: ci
jobs:
  slow:
    runs_on: linux
    steps:
      - {name: one, run: sleep 200}
      - {name: two, run: echo never}
  after:
    runs_on: linux
    needs: [slow]
    steps: [{name: after, run: echo after}]
"#,
        );
        let cancel = request.cancel.clone();
        let run = tokio::spawn(h.scheduler.schedule(request));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel(CancelReason::UserRequested);

        let report = run.await.unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.cancel_reason, Some(CancelReason::UserRequested));
        let slow = report.job("slow").unwrap();
        assert_eq!(slow.status, JobStatus::Cancelled);
        assert_eq!(slow.steps[0].status, gantry_core::run::StepStatus::Succeeded);
        assert_eq!(slow.steps[1].status, gantry_core::run::StepStatus::Cancelled);
        assert_eq!(report.job("after").unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_run_cancelled_during_final_step() {
        let h = harness(4);
        let request = request(
            r#"
name: deploy
jobs:
  rollout:
    runs_on: linux
    steps: [{name: rollout, run: sleep 200}]
"#,
        );
        let cancel = request.cancel.clone();
        let run = tokio::spawn(h.scheduler.schedule(request));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel(CancelReason::Superseded);

        let report = run.await.unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        let rollout = report.job("rollout").unwrap();
        assert_eq!(rollout.status, JobStatus::Cancelled);
        assert_eq!(rollout.cancel_reason, Some(CancelReason::Superseded));
        assert_eq!(rollout.steps[0].status, gantry_core::run::StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unresolvable_job_fails_without_blocking_siblings() {
        let h = harness(4);
        let report = h
            .scheduler
            .schedule(request(
                r#"
name: ci
jobs:
  setup:
    runs_on: linux
    steps: [{name: setup, uses: actions/missing@v1}]
  lint:
    runs_on: linux
    steps: [{name: lint, run: lint}]
"#,
            ))
            .await;
        let setup = report.job("setup").unwrap();
        assert_eq!(setup.status, JobStatus::Failed);
        assert_eq!(setup.error.as_deref(), Some("Action not found: actions/missing@v1"));
        assert_eq!(report.job("lint").unwrap().status, JobStatus::Succeeded);
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[test]
    fn test_cancelled_report() {
        let plan = plan("name: ci\njobs:\n  a:\n    runs_on: linux\n    steps: [{name: a, run: a}]\n");
        let report = cancelled_report(RunId::new(), None, &plan, CancelReason::Superseded);
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.jobs[0].status, JobStatus::Cancelled);
        assert_eq!(report.jobs[0].cancel_reason, Some(CancelReason::Superseded));
    }
}
