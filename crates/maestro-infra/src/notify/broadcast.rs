//! Broadcast notification sink.
//!
//! Fans execution events out to any number of subscribers over a
//! `tokio::sync::broadcast` channel. Publishing with no active subscribers
//! is a no-op; slow subscribers may observe lag per the broadcast channel's
//! semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use maestro_core::notify::NotificationSink;
use maestro_types::execution::{ExecutionStatus, ProgressSnapshot};

/// An execution lifecycle event as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    StatusChanged {
        execution_id: Uuid,
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Progress {
        execution_id: Uuid,
        snapshot: ProgressSnapshot,
    },
    Error {
        execution_id: Uuid,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },
}

/// Multi-consumer notification sink.
///
/// Cloning the sink clones the sender, allowing multiple producers and
/// consumers.
pub struct BroadcastSink {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastSink {
    /// Create a sink with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: ExecutionEvent) {
        // No subscribers is fine; the event is dropped.
        let _ = self.sender.send(event);
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Clone for BroadcastSink {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for BroadcastSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastSink")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

impl NotificationSink for BroadcastSink {
    fn notify_status_change(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        detail: Option<&str>,
    ) {
        self.publish(ExecutionEvent::StatusChanged {
            execution_id,
            status,
            detail: detail.map(str::to_string),
        });
    }

    fn notify_progress(&self, execution_id: Uuid, progress: &ProgressSnapshot) {
        self.publish(ExecutionEvent::Progress {
            execution_id,
            snapshot: progress.clone(),
        });
    }

    fn notify_error(&self, execution_id: Uuid, message: &str, detail: Option<&Value>) {
        self.publish(ExecutionEvent::Error {
            execution_id,
            message: message.to_string(),
            detail: detail.cloned(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
