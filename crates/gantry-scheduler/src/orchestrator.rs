//! Top-level control flow: match, plan, admit, schedule.

use crate::cancel::RunCancellation;
use crate::catalog::Catalog;
use crate::concurrency::{Admission, ConcurrencyController};
use crate::config::EngineConfig;
use crate::plan::{Planner, RunPlan};
use crate::scheduler::{RunRequest, Scheduler, cancelled_report};
use crate::triggers::TriggerMatcher;
use chrono::Utc;
use futures::future::join_all;
use gantry_core::events::{Event, RunCancelledPayload, RunQueuedPayload};
use gantry_core::run::{CancelReason, RunReport, TriggerEvent};
use gantry_core::workflow::WorkflowDefinition;
use gantry_core::{Error, Result, RunId};
use gantry_runner::JobExecutor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

pub struct Orchestrator {
    catalog: Arc<Catalog>,
    config: EngineConfig,
    scheduler: Scheduler,
    concurrency: ConcurrencyController,
    matcher: TriggerMatcher,
    active: Mutex<HashMap<RunId, RunCancellation>>,
}

impl Orchestrator {
    pub fn new(catalog: Arc<Catalog>, executor: Arc<JobExecutor>, config: EngineConfig) -> Self {
        Self {
            catalog,
            scheduler: Scheduler::new(executor, config.parallelism),
            config,
            concurrency: ConcurrencyController::new(),
            matcher: TriggerMatcher::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn concurrency(&self) -> &ConcurrencyController {
        &self.concurrency
    }

    /// Definitions among `definitions` that `event` activates.
    pub fn matching<'d>(
        &self,
        event: &TriggerEvent,
        definitions: &'d [WorkflowDefinition],
    ) -> Vec<&'d WorkflowDefinition> {
        definitions
            .iter()
            .filter(|d| self.matcher.matches(d, event))
            .collect()
    }

    /// Run every definition the event activates. Definitions that fail to
    /// plan are logged and skipped.
    pub async fn handle_event(
        &self,
        event: &TriggerEvent,
        definitions: &[WorkflowDefinition],
    ) -> Vec<RunReport> {
        let matched = self.matching(event, definitions);
        info!(
            event = %event.effective_kind(),
            git_ref = %event.short_ref(),
            matched = matched.len(),
            "Handling trigger event"
        );

        let runs = matched.into_iter().map(|definition| async move {
            match self.start_run(definition, event).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(workflow = %definition.name, error = %e, "Skipping workflow");
                    None
                }
            }
        });
        join_all(runs).await.into_iter().flatten().collect()
    }

    pub fn plan(&self, definition: &WorkflowDefinition, event: &TriggerEvent) -> Result<RunPlan> {
        Ok(Planner::new(&self.catalog, self.config.planner_config()).plan(definition, event)?)
    }

    /// Plan and run one definition regardless of its triggers.
    pub async fn start_run(
        &self,
        definition: &WorkflowDefinition,
        event: &TriggerEvent,
    ) -> Result<RunReport> {
        let plan = self.plan(definition, event)?;
        Ok(self.submit(RunRequest::new(plan, event.clone())).await)
    }

    /// Admit a planned run through its concurrency group and schedule it.
    pub async fn submit(&self, request: RunRequest) -> RunReport {
        let run_id = request.run_id;
        self.lock_active().insert(run_id, request.cancel.clone());

        let report = match request.plan.concurrency.clone() {
            Some(policy) => {
                let admission =
                    self.concurrency
                        .register(run_id, &policy.group, policy.mode(), request.cancel.clone());
                let admitted = match admission {
                    Admission::Admitted { superseded } => {
                        for id in superseded {
                            info!(run_id = %id, superseded_by = %run_id, "Run superseded");
                        }
                        true
                    }
                    Admission::Queued(ticket) => {
                        info!(run_id = %run_id, group = %policy.group, position = ticket.position(), "Run queued");
                        self.emit(Event::RunQueued(RunQueuedPayload {
                            run_id,
                            workflow: request.plan.workflow.clone(),
                            concurrency_group: policy.group.clone(),
                            queued_at: Utc::now(),
                        }))
                        .await;
                        ticket.wait().await
                    }
                };

                let report = if admitted {
                    self.scheduler.schedule(request).await
                } else {
                    let reason = request.cancel.reason().unwrap_or(CancelReason::Superseded);
                    info!(run_id = %run_id, reason = ?reason, "Run cancelled while queued");
                    self.emit(Event::RunCancelled(RunCancelledPayload {
                        run_id,
                        reason,
                        cancelled_at: Utc::now(),
                    }))
                    .await;
                    cancelled_report(run_id, request.parent, &request.plan, reason)
                };
                self.concurrency.release(run_id);
                report
            }
            None => self.scheduler.schedule(request).await,
        };

        self.lock_active().remove(&run_id);
        report
    }

    /// Cooperatively cancel an active or queued run.
    pub fn cancel(&self, run_id: RunId) -> Result<()> {
        let active = self.lock_active();
        let cancel = active
            .get(&run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        info!(run_id = %run_id, "Cancelling run");
        cancel.cancel(CancelReason::UserRequested);
        Ok(())
    }

    pub fn active_runs(&self) -> Vec<RunId> {
        let mut runs: Vec<RunId> = self.lock_active().keys().copied().collect();
        runs.sort();
        runs
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, RunCancellation>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.scheduler.executor().events().publish(event).await {
            warn!(error = %e, "Failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_cache::{CacheManager, MemoryStore};
    use gantry_core::loader::load_str;
    use gantry_core::ports::{ExecOutput, ExecRequest, ProcessRuntime};
    use gantry_core::run::{JobStatus, RunStatus};
    use gantry_runner::FsWorkspace;
    use gantry_secrets::{FileVault, SecretScopeManager};
    use std::time::Duration;

    struct SleepRuntime;

    #[async_trait]
    impl ProcessRuntime for SleepRuntime {
        async fn execute(&self, request: ExecRequest) -> Result<ExecOutput> {
            if let Some(ms) = request.command.strip_prefix("sleep ") {
                tokio::time::sleep(Duration::from_millis(ms.parse().unwrap_or(0))).await;
            }
            Ok(ExecOutput {
                exit_code: 0,
                output: Vec::new(),
            })
        }
    }

    fn orchestrator(dir: &tempfile::TempDir) -> Arc<Orchestrator> {
        let executor = JobExecutor::new(
            Arc::new(SleepRuntime),
            Arc::new(SecretScopeManager::new(Arc::new(FileVault::from_map(
                Default::default(),
            )))),
            Arc::new(CacheManager::new(Arc::new(MemoryStore::new()))),
            Arc::new(FsWorkspace::new(dir.path())),
        );
        Arc::new(Orchestrator::new(
            Arc::new(Catalog::new()),
            Arc::new(executor),
            EngineConfig::default(),
        ))
    }

    const DEPLOY: &str = r#"
name: deploy
triggers:
  - event: push
    branches: [main]
concurrency:
  group: deploy-${{ ref }}
  cancel_in_progress: true
jobs:
  deploy:
    runs_on: linux
    steps:
      - {name: wait, run: sleep 150}
      - {name: ship, run: ship}
"#;

    async fn wait_for_active(orchestrator: &Orchestrator, group: &str) -> RunId {
        for _ in 0..100 {
            if let Some(id) = orchestrator.concurrency().active(group) {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no active run in {group}");
    }

    #[tokio::test]
    async fn test_cancel_in_progress_through_orchestrator() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir);
        let definition = load_str(DEPLOY).unwrap();
        let event = TriggerEvent::push("main");

        let first = {
            let (o, d, e) = (orchestrator.clone(), definition.clone(), event.clone());
            tokio::spawn(async move { o.start_run(&d, &e).await })
        };
        let a = wait_for_active(&orchestrator, "deploy-main").await;

        let b = orchestrator.start_run(&definition, &event).await.unwrap();
        let a_report = first.await.unwrap().unwrap();

        assert_eq!(a_report.run_id, a);
        assert_eq!(a_report.status, RunStatus::Cancelled);
        assert_eq!(a_report.cancel_reason, Some(CancelReason::Superseded));
        assert_eq!(b.status, RunStatus::Succeeded);
        assert!(orchestrator.active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_user_cancel_and_unknown_run() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir);
        let definition = load_str(DEPLOY).unwrap();

        let run = {
            let (o, d) = (orchestrator.clone(), definition.clone());
            tokio::spawn(async move { o.start_run(&d, &TriggerEvent::push("main")).await })
        };
        let id = wait_for_active(&orchestrator, "deploy-main").await;
        orchestrator.cancel(id).unwrap();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.cancel_reason, Some(CancelReason::UserRequested));
        assert_eq!(report.job("deploy").unwrap().status, JobStatus::Cancelled);

        assert!(matches!(orchestrator.cancel(RunId::new()), Err(Error::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_handle_event_skips_invalid_and_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir);
        let ok = load_str(
            "name: ci\ntriggers:\n  - event: push\njobs:\n  a:\n    runs_on: linux\n    steps: [{name: a, run: echo}]\n",
        )
        .unwrap();
        let mut broken = ok.clone();
        broken.name = "broken".to_string();
        if let Some(job) = broken.jobs.get_mut("a") {
            job.needs = vec!["a".to_string()];
        }
        let release = load_str(
            "name: release\ntriggers:\n  - event: tag_push\njobs:\n  a:\n    runs_on: linux\n    steps: [{name: a, run: echo}]\n",
        )
        .unwrap();

        let reports = orchestrator
            .handle_event(&TriggerEvent::push("main"), &[ok, broken, release])
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].workflow, "ci");
        assert_eq!(reports[0].status, RunStatus::Succeeded);
    }
}
