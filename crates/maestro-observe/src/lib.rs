//! Observability setup for Maestro.

pub mod tracing_setup;
