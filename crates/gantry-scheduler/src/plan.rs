//! Run planning: turns a definition and an event into a fully concrete plan.
//!
//! Planning inlines composite actions, resolves reusable workflows into
//! nested plans, expands matrices and substitutes `${{ … }}` expressions.
//! A [`DefinitionError`] blocks the whole run; a composite or invocation
//! failure only marks the referencing job as unresolvable.

use crate::catalog::Catalog;
use crate::composite::{CompositeResolver, DEFAULT_COMPOSITE_DEPTH};
use crate::matrix::MatrixExpander;
use crate::reusable::{DEFAULT_NESTING_DEPTH, ReusableInvoker};
use gantry_core::interpolation::InterpolationContext;
use gantry_core::loader;
use gantry_core::plan::{ConcreteStep, StepKind};
use gantry_core::run::TriggerEvent;
use gantry_core::workflow::{
    CacheSpec, ConcurrencyPolicy, JobDefinition, PUBLISH_ACTION, Permissions, StepAction,
    StepDefinition, VersionedRef, WorkflowDefinition,
};
use gantry_core::{DefinitionError, FamilyId, JobKey, ResolutionError};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// A fully concrete run: every job instance, its dependencies and its work.
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub workflow: String,
    /// Catalog address of the definition, for nested runs.
    pub source: Option<PlanSource>,
    /// Concurrency policy with the group key already rendered.
    pub concurrency: Option<ConcurrencyPolicy>,
    /// Secret names the run may use.
    pub scope: BTreeSet<String>,
    pub families: Vec<FamilyPlan>,
    /// Job instances in dependency order.
    pub jobs: Vec<PlannedJob>,
}

impl RunPlan {
    pub fn job(&self, key: &str) -> Option<&PlannedJob> {
        self.jobs.iter().find(|j| j.key.as_str() == key)
    }

    pub fn family(&self, id: FamilyId) -> Option<&FamilyPlan> {
        self.families.iter().find(|f| f.id == id)
    }

    pub fn concurrency_group(&self) -> Option<&str> {
        self.concurrency.as_ref().map(|c| c.group.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSource {
    pub reference: VersionedRef,
    pub digest: String,
}

/// One expanded matrix job.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyPlan {
    pub id: FamilyId,
    pub job: String,
    pub legs: Vec<JobKey>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedJob {
    pub key: JobKey,
    /// Name of the job definition.
    pub job: String,
    /// Upstream job instances; a need on a matrix job expands to every leg.
    pub needs: Vec<JobKey>,
    pub family: Option<FamilyId>,
    pub matrix: BTreeMap<String, String>,
    pub continue_on_error: bool,
    pub tolerate_failed_needs: bool,
    pub work: JobWork,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobWork {
    Steps {
        runs_on: String,
        steps: Vec<ConcreteStep>,
        grants: BTreeSet<String>,
        permissions: Permissions,
    },
    Nested {
        plan: Box<RunPlan>,
    },
    /// A composite or reusable reference could not be resolved. The job
    /// fails with this error when scheduled.
    Unresolvable {
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub max_nesting_depth: usize,
    pub max_composite_depth: usize,
    pub default_shell: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: DEFAULT_NESTING_DEPTH,
            max_composite_depth: DEFAULT_COMPOSITE_DEPTH,
            default_shell: "bash".to_string(),
        }
    }
}

pub struct Planner<'a> {
    catalog: &'a Catalog,
    config: PlannerConfig,
    matrix: MatrixExpander,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a Catalog, config: PlannerConfig) -> Self {
        Self {
            catalog,
            config,
            matrix: MatrixExpander::new(),
        }
    }

    /// Plan a top-level run. Its secret scope is every secret the definition mentions.
    pub fn plan(
        &self,
        definition: &WorkflowDefinition,
        event: &TriggerEvent,
    ) -> Result<RunPlan, DefinitionError> {
        let mut plan = self.plan_run(definition, event, None, definition.mentioned_secrets(), &[])?;

        if let Some(policy) = &definition.concurrency {
            let ctx = run_context(definition, event);
            plan.concurrency = Some(ConcurrencyPolicy {
                group: ctx.interpolate(&policy.group),
                cancel_in_progress: policy.cancel_in_progress,
            });
        }
        Ok(plan)
    }

    fn plan_run(
        &self,
        definition: &WorkflowDefinition,
        event: &TriggerEvent,
        inputs: Option<BTreeMap<String, String>>,
        scope: BTreeSet<String>,
        ancestry: &[VersionedRef],
    ) -> Result<RunPlan, DefinitionError> {
        loader::validate(definition)?;
        let order = loader::job_order(definition)?;

        let mut base = run_context(definition, event);
        if let Some(inputs) = inputs {
            base = base.with_inputs(inputs);
        }

        let mut families = Vec::new();
        let mut jobs = Vec::new();
        let mut legs_of: HashMap<String, Vec<JobKey>> = HashMap::new();
        let mut seen: HashSet<JobKey> = HashSet::new();

        for name in order {
            let Some(job) = definition.job(&name) else {
                continue;
            };

            let (legs, family) = match self.matrix.expand(&name, job) {
                Some(expansion) => {
                    if expansion.legs.is_empty() {
                        warn!(job = %name, "Matrix expands to no legs");
                    }
                    let legs: Vec<_> = expansion
                        .legs
                        .iter()
                        .map(|leg| (leg.key.clone(), leg.context()))
                        .collect();
                    families.push(FamilyPlan {
                        id: expansion.family,
                        job: name.clone(),
                        legs: legs.iter().map(|(key, _)| key.clone()).collect(),
                        fail_fast: expansion.fail_fast,
                        max_parallel: expansion.max_parallel,
                    });
                    (legs, Some(expansion.family))
                }
                None => (vec![(JobKey::new(&name), BTreeMap::new())], None),
            };

            let needs: Vec<JobKey> = job
                .needs
                .iter()
                .flat_map(|need| legs_of.get(need).cloned().unwrap_or_default())
                .collect();

            for (key, matrix) in &legs {
                // Leg keys render axis values as text, so `1` and `"1"` collide.
                if !seen.insert(key.clone()) {
                    return Err(DefinitionError::DuplicateJobKey {
                        key: key.to_string(),
                    });
                }
                let ctx = if matrix.is_empty() {
                    base.clone()
                } else {
                    base.clone().with_matrix(matrix.clone())
                };
                let work = match self.plan_work(definition, job, &ctx, &scope, event, ancestry) {
                    Ok(work) => work,
                    Err(e) => {
                        warn!(job = %key, error = %e, "Job cannot be resolved");
                        JobWork::Unresolvable {
                            error: e.to_string(),
                        }
                    }
                };
                jobs.push(PlannedJob {
                    key: key.clone(),
                    job: name.clone(),
                    needs: needs.clone(),
                    family,
                    matrix: matrix.clone(),
                    continue_on_error: job.continue_on_error,
                    tolerate_failed_needs: job.tolerate_failed_needs,
                    work,
                });
            }
            legs_of.insert(name, legs.into_iter().map(|(key, _)| key).collect());
        }

        debug!(workflow = %definition.name, jobs = jobs.len(), "Planned run");
        Ok(RunPlan {
            workflow: definition.name.clone(),
            source: None,
            concurrency: None,
            scope,
            families,
            jobs,
        })
    }

    fn plan_work(
        &self,
        definition: &WorkflowDefinition,
        job: &JobDefinition,
        ctx: &InterpolationContext,
        scope: &BTreeSet<String>,
        event: &TriggerEvent,
        ancestry: &[VersionedRef],
    ) -> gantry_core::Result<JobWork> {
        if let Some(reference) = job.reusable_ref() {
            let mut reference = reference?;
            reference.with = reference
                .with
                .iter()
                .map(|(name, value)| (name.clone(), interpolate_value(ctx, value)))
                .collect();

            let invocation = ReusableInvoker::new(self.catalog)
                .with_max_depth(self.config.max_nesting_depth)
                .invoke(&reference, scope, ancestry)?;

            let mut chain = ancestry.to_vec();
            chain.push(reference.target.clone());
            let mut nested = self.plan_run(
                &invocation.snapshot.definition,
                event,
                Some(invocation.input_context()),
                invocation.secrets.clone(),
                &chain,
            )?;
            nested.source = Some(PlanSource {
                reference: reference.target,
                digest: invocation.snapshot.digest.clone(),
            });
            return Ok(JobWork::Nested {
                plan: Box::new(nested),
            });
        }

        let mut grants = job.secrets.resolve(scope);
        grants.retain(|name| scope.contains(name));

        let steps = CompositeResolver::new(self.catalog)
            .with_max_depth(self.config.max_composite_depth)
            .expand_steps(&job.steps, &grants)?
            .iter()
            .map(|step| self.concretize(definition, step, ctx))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobWork::Steps {
            runs_on: ctx.interpolate(job.runs_on.as_deref().unwrap_or_default()),
            steps,
            grants,
            permissions: definition.permissions.elevated_by(job.permissions.as_ref()),
        })
    }

    fn concretize(
        &self,
        definition: &WorkflowDefinition,
        step: &StepDefinition,
        ctx: &InterpolationContext,
    ) -> Result<ConcreteStep, ResolutionError> {
        let kind = match step.action() {
            Some(StepAction::Run { command, shell }) => StepKind::Run {
                shell: shell
                    .or(definition.shell_default())
                    .unwrap_or(&self.config.default_shell)
                    .to_string(),
                command: ctx.interpolate(command),
            },
            Some(StepAction::Uses { with, .. }) if step.is_publish() => {
                let with = ctx.interpolate_map(with);
                let package = with.get("package").cloned().ok_or_else(|| {
                    ResolutionError::InputMismatch {
                        action: PUBLISH_ACTION.to_string(),
                        input: "package".to_string(),
                        reason: "required input is not bound".to_string(),
                    }
                })?;
                StepKind::Publish {
                    package,
                    access: with
                        .get("access")
                        .cloned()
                        .unwrap_or_else(|| "public".to_string()),
                }
            }
            Some(StepAction::Uses { reference, .. }) => {
                return Err(ResolutionError::ActionNotFound {
                    reference: reference.to_string(),
                });
            }
            None => {
                return Err(ResolutionError::ActionNotFound {
                    reference: step.name.clone(),
                });
            }
        };

        Ok(ConcreteStep {
            name: ctx.interpolate(&step.name),
            kind,
            env: ctx.interpolate_map(&step.env),
            secrets: step.secrets.clone(),
            working_directory: step.working_directory.as_deref().map(|d| ctx.interpolate(d)),
            continue_on_error: step.continue_on_error,
            cache: step.cache.as_ref().map(|cache| CacheSpec {
                namespace: ctx.interpolate(&cache.namespace),
                ..cache.clone()
            }),
        })
    }
}

fn run_context(definition: &WorkflowDefinition, event: &TriggerEvent) -> InterpolationContext {
    InterpolationContext::new().with_run(
        &definition.name,
        event.short_ref(),
        event.effective_kind().to_string(),
    )
}

/// Interpolate a string value. When substitution produces a number or a
/// boolean, the typed value is kept so typed inputs can be bound from
/// matrix values.
fn interpolate_value(ctx: &InterpolationContext, value: &Value) -> Value {
    let Value::String(source) = value else {
        return value.clone();
    };
    let rendered = ctx.interpolate(source);
    if rendered != *source
        && let Ok(typed @ (Value::Number(_) | Value::Bool(_))) = serde_json::from_str(&rendered)
    {
        return typed;
    }
    Value::String(rendered)
}
