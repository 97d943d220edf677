//! Test infrastructure for Gantry.
//!
//! In-memory implementations of every port plus a [`TestEngine`] that wires
//! them into an [`Orchestrator`](gantry_scheduler::Orchestrator), so
//! end-to-end tests run whole workflows without touching a shell, a registry
//! or the filesystem.
//!
//! # Usage
//!
//! ```ignore
//! use gantry_tests::{TestEngine, WorkflowFixture};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let engine = TestEngine::new();
//!     let report = engine.run(&WorkflowFixture::ci(), &TriggerEvent::push("main")).await?;
//! }
//! ```

pub mod engine;
pub mod fakes;
pub mod fixtures;

pub use engine::TestEngine;
pub use fakes::*;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gantry_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
