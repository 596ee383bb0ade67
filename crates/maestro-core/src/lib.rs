//! Business logic and ports for Maestro.
//!
//! This crate contains the workflow validator, the execution engine, the
//! circuit breaker, and the trait definitions ("ports") that the
//! infrastructure layer implements: the workflow store, the agent directory,
//! the per-platform agent adapter, and the notification sink. It depends
//! only on `maestro-types` -- never on `maestro-infra` or any IO crate.

pub mod adapter;
pub mod breaker;
pub mod notify;
pub mod repository;
pub mod service;
pub mod workflow;
