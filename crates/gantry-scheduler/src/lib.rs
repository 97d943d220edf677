//! Planning, concurrency control and scheduling for Gantry.

pub mod cancel;
pub mod catalog;
pub mod composite;
pub mod concurrency;
pub mod config;
pub mod dag;
pub mod matrix;
pub mod orchestrator;
pub mod plan;
pub mod reusable;
pub mod scheduler;
pub mod triggers;

pub use cancel::RunCancellation;
pub use catalog::{Catalog, WorkflowSnapshot};
pub use composite::CompositeResolver;
pub use concurrency::{Admission, ConcurrencyController, QueueTicket};
pub use config::EngineConfig;
pub use dag::JobGraph;
pub use matrix::{MatrixExpander, MatrixExpansion, MatrixLeg};
pub use orchestrator::Orchestrator;
pub use plan::{JobWork, PlannedJob, Planner, PlannerConfig, RunPlan};
pub use reusable::{Invocation, ReusableInvoker};
pub use scheduler::{RunRequest, Scheduler};
pub use triggers::TriggerMatcher;
