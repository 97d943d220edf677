//! Logging and OpenTelemetry setup for Gantry.
//!
//! Installs a `tracing` subscriber with an env filter, a pretty, compact or
//! JSON formatter, and optionally an OTLP exporter. Span helpers carry the
//! workflow, run, job and step names as structured fields.

pub mod spans;
pub mod tracer;

pub use spans::{WorkflowAttributes, cache_span, job_span, run_span, secret_span, step_span};
pub use tracer::{LogFormat, OtlpConfig, TracerError, TracingConfig, init_tracer, shutdown_tracer};
