//! Step execution for Gantry.
//!
//! [`JobExecutor`] runs a job's concrete steps in order against the ports:
//! it restores and saves caches, binds each step's secrets, runs commands
//! through a [`ProcessRuntime`](gantry_core::ports::ProcessRuntime), and
//! redacts output before it is logged or published.

pub mod bus;
pub mod executor;
pub mod registry;
pub mod shell;
pub mod workspace;

pub use bus::BroadcastEventBus;
pub use executor::{ExecutorConfig, JobContext, JobExecutor, JobOutcome};
pub use registry::DryRunRegistry;
pub use shell::{ShellConfig, ShellRuntime};
pub use workspace::FsWorkspace;
