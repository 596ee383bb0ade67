//! Notification sink implementations.

pub mod broadcast;

pub use broadcast::{BroadcastSink, ExecutionEvent};
