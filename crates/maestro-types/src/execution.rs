//! Execution tracking types.
//!
//! A `WorkflowExecution` is the in-memory record of one run of a workflow:
//! overall status, the per-step records created eagerly at start, and the
//! mutable context (variables, step outputs, metadata) that flows between
//! steps. Executions live only inside the engine's registry and are dropped
//! once they reach a terminal status.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses remove the execution from the live registry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Status of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Mutable bag of data available for `${...}` reference resolution:
/// caller-supplied variables, accumulated step outputs keyed by step id,
/// and arbitrary metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Caller-supplied variables.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Outputs of completed steps, keyed by step id.
    #[serde(default)]
    pub step_outputs: HashMap<String, Value>,
    /// Arbitrary run metadata (trigger source, actor, ...).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// One run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution id.
    pub id: Uuid,
    /// The workflow definition being executed.
    pub workflow_id: Uuid,
    /// Current status.
    pub status: ExecutionStatus,
    /// When the step loop started (unset for a dry run / pending execution).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message for a failed execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Variables, step outputs, and metadata for this run.
    pub context: ExecutionContext,
    /// Per-step records, one per workflow step, in execution order.
    pub steps: Vec<StepExecution>,
}

impl WorkflowExecution {
    /// Number of steps that completed successfully.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// The step currently running, if any.
    pub fn running_step(&self) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.status == StepStatus::Running)
    }
}

/// Per-step run record, mutated only by the engine while driving the step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    /// Id of the workflow step this record tracks.
    pub step_id: String,
    /// The agent the step targets.
    pub agent_id: Uuid,
    /// Current step status.
    pub status: StepStatus,
    /// Resolved input parameters (references substituted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Output captured from the agent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message from the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of retries consumed (0 when the first attempt succeeded).
    pub retry_count: u32,
    /// When the step started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a final status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Measured wall-clock execution time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl StepExecution {
    /// Fresh pending record for a step.
    pub fn pending(step_id: impl Into<String>, agent_id: Uuid) -> Self {
        Self {
            step_id: step_id.into(),
            agent_id,
            status: StepStatus::Pending,
            input: None,
            output: None,
            error: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Point-in-time progress view over an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    /// `round(100 * completed / total)`.
    pub percent: u8,
    /// Id of the step currently running, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
