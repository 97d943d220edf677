//! Gantry Core
//!
//! Core domain types, port traits, and error handling for Gantry.
//! Every other crate in the workspace speaks the vocabulary defined here:
//! workflow definitions, run/job/step states, events, and the narrow
//! interfaces to the process runtime, secret vault, blob store, and
//! package registry.

pub mod error;
pub mod events;
pub mod ids;
pub mod interpolation;
pub mod loader;
pub mod plan;
pub mod ports;
pub mod run;
pub mod secrets;
pub mod workflow;

pub use error::{
    CacheError, DefinitionError, Error, ExecutionError, InvocationError, ResolutionError, Result,
};
pub use ids::*;
