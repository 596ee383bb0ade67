//! Business logic services (use cases).
//!
//! Services orchestrate store calls, validation, and the execution engine.
//! They depend on traits (ports) -- never on concrete infrastructure
//! implementations.

pub mod workflow;
