//! Notification sink port.
//!
//! The engine reports status transitions, progress, and errors through this
//! interface at well-defined points in the execution lifecycle. Delivery
//! guarantees are the sink's problem, not the engine's; implementations
//! must not block.

use serde_json::Value;
use uuid::Uuid;

use maestro_types::execution::{ExecutionStatus, ProgressSnapshot};

/// Receiver for execution lifecycle events.
pub trait NotificationSink: Send + Sync {
    /// An execution changed status (includes the initial `Pending`).
    fn notify_status_change(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        detail: Option<&str>,
    );

    /// Step-level progress changed.
    fn notify_progress(&self, execution_id: Uuid, progress: &ProgressSnapshot);

    /// An execution-time error occurred.
    fn notify_error(&self, execution_id: Uuid, message: &str, detail: Option<&Value>);
}

/// Sink that drops every event. Useful for tests and fire-and-forget setups.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify_status_change(
        &self,
        _execution_id: Uuid,
        _status: ExecutionStatus,
        _detail: Option<&str>,
    ) {
    }

    fn notify_progress(&self, _execution_id: Uuid, _progress: &ProgressSnapshot) {}

    fn notify_error(&self, _execution_id: Uuid, _message: &str, _detail: Option<&Value>) {}
}
