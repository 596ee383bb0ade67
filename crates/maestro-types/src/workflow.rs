//! Workflow definition types.
//!
//! `WorkflowDefinition` is the canonical shape of a stored workflow: an
//! ordered list of steps, each targeting one agent, with conditions that
//! gate participation and an optional retry policy. Execution-side records
//! live in [`crate::execution`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A stored multi-step workflow over external agents.
///
/// Invariants (enforced by the validator/service, not by construction):
/// at least one step; step ids unique within the definition. Steps are only
/// ever replaced as a whole set, never patched individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Lifecycle status. Only `Active` workflows can be executed.
    pub status: WorkflowStatus,
    /// Ordered list of steps. The engine drives steps in exactly this order.
    pub steps: Vec<WorkflowStep>,
    /// Who created this workflow.
    pub created_by: String,
    /// When the workflow was created.
    pub created_at: DateTime<Utc>,
    /// When the workflow was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

// ---------------------------------------------------------------------------
// Workflow Step
// ---------------------------------------------------------------------------

/// Default per-step timeout in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// A single step in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// User-defined step id (e.g. "sync-crm"). Unique within a workflow.
    pub id: String,
    /// The agent this step executes.
    pub agent_id: Uuid,
    /// Execution sequence number. The service orders steps by this value,
    /// with declaration order as the stable tie-break.
    pub step_order: u32,
    /// Human-readable step name.
    pub name: String,
    /// Parameters passed to the agent. String values may embed
    /// `${path.to.value}` references resolved against the execution context.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// Conditions gating participation, evaluated first-match-wins.
    #[serde(default = "default_conditions")]
    pub conditions: Vec<StepCondition>,
    /// Retry policy. `None` means the engine defaults apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Per-step timeout in seconds (default 300).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_conditions() -> Vec<StepCondition> {
    vec![StepCondition::Always]
}

impl WorkflowStep {
    /// Effective timeout for this step.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS)
    }

    /// All step ids this step depends on, across every condition,
    /// deduplicated in first-seen order.
    pub fn dependency_ids(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for condition in &self.conditions {
            for dep in condition.depends_on() {
                if !seen.contains(&dep.as_str()) {
                    seen.push(dep.as_str());
                }
            }
        }
        seen
    }
}

// ---------------------------------------------------------------------------
// Step Conditions
// ---------------------------------------------------------------------------

/// A predicate deciding whether a step runs, given prior steps' outcomes.
///
/// The engine evaluates a step's condition list first-match-wins: the first
/// condition alone determines participation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    /// Run unconditionally.
    Always,
    /// Run only if every named dependency completed successfully.
    /// An empty `depends_on` means "always true".
    OnSuccess {
        #[serde(default)]
        depends_on: Vec<String>,
    },
    /// Run only if at least one named dependency failed.
    /// An empty `depends_on` means "never".
    OnFailure {
        #[serde(default)]
        depends_on: Vec<String>,
    },
    /// Expression condition. No expression language is defined upstream;
    /// the engine treats this as always-true.
    Expression { expression: String },
}

impl StepCondition {
    /// Step ids this condition depends on (empty for `Always`/`Expression`).
    pub fn depends_on(&self) -> &[String] {
        match self {
            StepCondition::OnSuccess { depends_on } | StepCondition::OnFailure { depends_on } => {
                depends_on
            }
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Retry Configuration
// ---------------------------------------------------------------------------

/// Retry policy for a workflow step: bounded attempts with exponential,
/// capped backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first failure (default 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds (default 1000).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Multiplier applied per attempt (default 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound on any single backoff delay in milliseconds (default 30000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_step(id: &str, conditions: Vec<StepCondition>) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            agent_id: Uuid::now_v7(),
            step_order: 1,
            name: id.to_string(),
            parameters: HashMap::from([("query".to_string(), json!("${input.query}"))]),
            conditions,
            retry: None,
            timeout_secs: None,
        }
    }

    // -----------------------------------------------------------------------
    // Serde roundtrips
    // -----------------------------------------------------------------------

    #[test]
    fn test_definition_json_roundtrip() {
        let def = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: "crm-sync".to_string(),
            description: Some("Sync CRM contacts nightly".to_string()),
            status: WorkflowStatus::Active,
            steps: vec![sample_step("sync", vec![StepCondition::Always])],
            created_by: "ops".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json_str = serde_json::to_string(&def).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.name, "crm-sync");
        assert_eq!(parsed.status, WorkflowStatus::Active);
        assert_eq!(parsed.steps.len(), 1);
    }

    #[test]
    fn test_condition_tagged_serde() {
        let cond = StepCondition::OnSuccess {
            depends_on: vec!["sync".to_string()],
        };
        let json = serde_json::to_string(&cond).unwrap();
        assert!(json.contains("\"type\":\"on_success\""));
        let parsed: StepCondition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cond);

        let always: StepCondition = serde_json::from_str(r#"{"type":"always"}"#).unwrap();
        assert_eq!(always, StepCondition::Always);
    }

    #[test]
    fn test_step_defaults_on_deserialize() {
        // A minimal step JSON gets the Always condition and empty parameters.
        let json = format!(
            r#"{{"id":"a","agent_id":"{}","step_order":1,"name":"A"}}"#,
            Uuid::now_v7()
        );
        let step: WorkflowStep = serde_json::from_str(&json).unwrap();
        assert_eq!(step.conditions, vec![StepCondition::Always]);
        assert!(step.parameters.is_empty());
        assert_eq!(step.timeout_secs(), DEFAULT_STEP_TIMEOUT_SECS);
    }

    // -----------------------------------------------------------------------
    // Retry defaults
    // -----------------------------------------------------------------------

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_ms, 1000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.max_backoff_ms, 30_000);
    }

    #[test]
    fn test_retry_config_partial_deserialize() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_retries":1}"#).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.backoff_ms, 1000);
    }

    // -----------------------------------------------------------------------
    // Dependency extraction
    // -----------------------------------------------------------------------

    #[test]
    fn test_dependency_ids_deduplicated() {
        let step = sample_step(
            "report",
            vec![
                StepCondition::OnSuccess {
                    depends_on: vec!["sync".to_string(), "enrich".to_string()],
                },
                StepCondition::OnFailure {
                    depends_on: vec!["sync".to_string()],
                },
            ],
        );
        assert_eq!(step.dependency_ids(), vec!["sync", "enrich"]);
    }

    #[test]
    fn test_dependency_ids_empty_for_always_and_expression() {
        let step = sample_step(
            "solo",
            vec![
                StepCondition::Always,
                StepCondition::Expression {
                    expression: "output.count > 0".to_string(),
                },
            ],
        );
        assert!(step.dependency_ids().is_empty());
    }
}
