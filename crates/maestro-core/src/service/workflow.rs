//! Workflow management service.
//!
//! The library surface callers wire a transport around: definition CRUD
//! against the store (guarded against in-flight executions), validation,
//! and execution control delegated to the engine. Mutating operations fail
//! synchronously; execution-time failures are only ever visible through
//! the execution record and the notification sink.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use maestro_types::error::StoreError;
use maestro_types::execution::{ProgressSnapshot, WorkflowExecution};
use maestro_types::workflow::{WorkflowDefinition, WorkflowStatus, WorkflowStep};

use crate::adapter::AgentDirectory;
use crate::repository::workflow::{Page, PageRequest, WorkflowFilter, WorkflowStore};
use crate::workflow::engine::{EngineError, ExecuteOptions, WorkflowEngine};
use crate::workflow::validator::{ValidationReport, WorkflowValidator};

// ---------------------------------------------------------------------------
// Requests and errors
// ---------------------------------------------------------------------------

/// Input for creating a workflow.
#[derive(Debug, Clone)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub description: Option<String>,
    /// Initial lifecycle status (default `Draft`).
    pub status: Option<WorkflowStatus>,
    pub steps: Vec<WorkflowStep>,
    pub created_by: String,
}

/// Partial update. `None` fields are left unchanged; `steps` replaces the
/// whole step set when present.
#[derive(Debug, Clone, Default)]
pub struct UpdateWorkflowRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub steps: Option<Vec<WorkflowStep>>,
}

/// Errors surfaced synchronously by the service.
#[derive(Debug, Error)]
pub enum WorkflowServiceError {
    #[error("workflow not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("workflow definition failed validation ({} error(s))", .0.errors.len())]
    Validation(ValidationReport),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// WorkflowService
// ---------------------------------------------------------------------------

/// Service orchestrating the workflow lifecycle.
///
/// Generic over the store and the agent directory to keep the core free of
/// infrastructure dependencies.
pub struct WorkflowService<S: WorkflowStore, D: AgentDirectory> {
    store: S,
    engine: Arc<WorkflowEngine<D>>,
    validator: WorkflowValidator<D>,
}

impl<S: WorkflowStore, D: AgentDirectory + 'static> WorkflowService<S, D> {
    pub fn new(store: S, directory: Arc<D>, engine: Arc<WorkflowEngine<D>>) -> Self {
        Self {
            store,
            engine,
            validator: WorkflowValidator::new(directory),
        }
    }

    // -----------------------------------------------------------------------
    // Definition CRUD
    // -----------------------------------------------------------------------

    /// Create a workflow. Validation errors reject the create; warnings
    /// (inactive agents, unreachable steps) do not.
    pub async fn create_workflow(
        &self,
        request: CreateWorkflowRequest,
    ) -> Result<WorkflowDefinition, WorkflowServiceError> {
        let now = Utc::now();
        let mut definition = WorkflowDefinition {
            id: Uuid::now_v7(),
            name: request.name,
            description: request.description,
            status: request.status.unwrap_or(WorkflowStatus::Draft),
            steps: request.steps,
            created_by: request.created_by,
            created_at: now,
            updated_at: now,
        };
        normalize_step_order(&mut definition.steps);

        let report = self.validator.validate(&definition).await?;
        if !report.valid {
            return Err(WorkflowServiceError::Validation(report));
        }

        self.store.create(&definition).await?;
        tracing::info!(
            workflow_id = %definition.id,
            name = definition.name.as_str(),
            steps = definition.steps.len(),
            "workflow created"
        );
        Ok(definition)
    }

    /// Update a workflow. Rejected with `Conflict` while any execution of
    /// it is in flight. A provided step set replaces the old one wholesale.
    pub async fn update_workflow(
        &self,
        id: &Uuid,
        request: UpdateWorkflowRequest,
    ) -> Result<WorkflowDefinition, WorkflowServiceError> {
        if self.engine.has_active_execution(id) {
            return Err(WorkflowServiceError::Conflict(
                "workflow has an execution in flight".to_string(),
            ));
        }

        let mut definition = self
            .store
            .get(id)
            .await?
            .ok_or(WorkflowServiceError::NotFound)?;

        if let Some(name) = request.name {
            definition.name = name;
        }
        if let Some(description) = request.description {
            definition.description = Some(description);
        }
        if let Some(status) = request.status {
            definition.status = status;
        }
        if let Some(steps) = request.steps {
            definition.steps = steps;
            normalize_step_order(&mut definition.steps);
        }
        definition.updated_at = Utc::now();

        let report = self.validator.validate(&definition).await?;
        if !report.valid {
            return Err(WorkflowServiceError::Validation(report));
        }

        self.store.update(&definition).await?;
        tracing::info!(workflow_id = %definition.id, "workflow updated");
        Ok(definition)
    }

    pub async fn get_workflow(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, WorkflowServiceError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_workflows(
        &self,
        filter: &WorkflowFilter,
        page: &PageRequest,
    ) -> Result<Page<WorkflowDefinition>, WorkflowServiceError> {
        Ok(self.store.list(filter, page).await?)
    }

    /// Delete a workflow. Rejected with `Conflict` while executing.
    pub async fn delete_workflow(&self, id: &Uuid) -> Result<(), WorkflowServiceError> {
        if self.engine.has_active_execution(id) {
            return Err(WorkflowServiceError::Conflict(
                "workflow has an execution in flight".to_string(),
            ));
        }
        if !self.store.delete(id).await? {
            return Err(WorkflowServiceError::NotFound);
        }
        tracing::info!(workflow_id = %id, "workflow deleted");
        Ok(())
    }

    /// Validate a definition without persisting or executing anything.
    pub async fn validate_workflow(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<ValidationReport, WorkflowServiceError> {
        Ok(self.validator.validate(definition).await?)
    }

    // -----------------------------------------------------------------------
    // Execution control
    // -----------------------------------------------------------------------

    /// Start an execution on behalf of `actor`. Returns the execution id
    /// immediately; completion is observed via `get_execution`,
    /// `get_progress`, or the notification sink.
    pub async fn execute_workflow(
        &self,
        id: &Uuid,
        mut options: ExecuteOptions,
        actor: &str,
    ) -> Result<Uuid, WorkflowServiceError> {
        let definition = self
            .store
            .get(id)
            .await?
            .ok_or(WorkflowServiceError::NotFound)?;

        options
            .metadata
            .insert("triggered_by".to_string(), Value::String(actor.to_string()));

        let execution_id = self.engine.start(&definition, options).await?;
        tracing::info!(
            workflow_id = %id,
            execution_id = %execution_id,
            actor,
            "execution requested"
        );
        Ok(execution_id)
    }

    /// Snapshot of a live execution (`None` once terminal).
    pub fn get_execution(&self, execution_id: &Uuid) -> Option<WorkflowExecution> {
        self.engine.get_execution(execution_id)
    }

    /// Progress of a live execution (`None` once terminal).
    pub fn get_progress(&self, execution_id: &Uuid) -> Option<ProgressSnapshot> {
        self.engine.progress(execution_id)
    }

    /// Cancel a live execution.
    pub fn cancel_execution(&self, execution_id: &Uuid) -> Result<(), WorkflowServiceError> {
        Ok(self.engine.cancel(execution_id)?)
    }
}

/// Order steps by `step_order`; the sort is stable, so declaration order
/// breaks ties.
fn normalize_step_order(steps: &mut [WorkflowStep]) {
    steps.sort_by_key(|s| s.step_order);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
