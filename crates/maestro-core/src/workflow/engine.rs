//! Workflow execution engine.
//!
//! Turns a validated, active definition plus runtime options into a tracked
//! `WorkflowExecution` and drives its steps in declared order on a spawned
//! task. Each step is gated by its first condition, has its parameters
//! resolved against the execution context, and is executed through the
//! owning platform's adapter behind that adapter's circuit breaker, with
//! bounded retries and exponential backoff.
//!
//! # Concurrency model
//!
//! Exactly one task drives a given execution; everything else (status
//! queries, progress, cancellation) goes through the registry's
//! `Arc<RwLock<_>>` record. Cancellation is cooperative: the loop top and
//! the backoff sleep are the checkpoints, and an adapter call already in
//! flight is never preempted -- its late result is discarded.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use maestro_types::error::StoreError;
use maestro_types::execution::{
    ExecutionContext, ExecutionStatus, ProgressSnapshot, StepExecution, StepStatus,
    WorkflowExecution,
};
use maestro_types::workflow::{
    StepCondition, WorkflowDefinition, WorkflowStatus, WorkflowStep,
};

use crate::adapter::{AdapterError, AdapterRegistry, AgentDirectory};
use crate::breaker::CircuitError;
use crate::notify::NotificationSink;
use crate::workflow::context::resolve_parameters;
use crate::workflow::retry::backoff_delay;
use crate::workflow::validator::{ValidationReport, WorkflowValidator};

// ---------------------------------------------------------------------------
// Options and errors
// ---------------------------------------------------------------------------

/// Runtime options for one execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Caller-supplied variables, available to `${...}` references.
    pub variables: std::collections::HashMap<String, Value>,
    /// Arbitrary run metadata (trigger source, actor, ...).
    pub metadata: std::collections::HashMap<String, Value>,
    /// Validate and complete immediately without touching any adapter.
    pub dry_run: bool,
}

/// Errors surfaced synchronously by engine operations.
///
/// Failures inside the asynchronous step loop are never raised to the
/// caller of `start`; they are recorded on the execution and reported via
/// the notification sink.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The definition's lifecycle status forbids execution.
    #[error("workflow is not active (status: {0:?})")]
    NotActive(WorkflowStatus),

    /// The definition no longer passes validation.
    #[error("workflow definition failed validation ({} error(s))", .0.errors.len())]
    ValidationFailed(ValidationReport),

    /// No live execution with that id.
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Agent directory lookup failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Execution registry
// ---------------------------------------------------------------------------

struct ExecutionSlot {
    workflow_id: Uuid,
    record: Arc<RwLock<WorkflowExecution>>,
    cancel: CancellationToken,
}

fn read(record: &RwLock<WorkflowExecution>) -> RwLockReadGuard<'_, WorkflowExecution> {
    // Recover the guard even if a writer panicked mid-update.
    record.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(record: &RwLock<WorkflowExecution>) -> RwLockWriteGuard<'_, WorkflowExecution> {
    record.write().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// The orchestrator. One instance serves any number of concurrent
/// executions; each runs on its own task and never blocks the caller after
/// `start` returns its id.
pub struct WorkflowEngine<D: AgentDirectory> {
    directory: Arc<D>,
    registry: Arc<AdapterRegistry>,
    sink: Arc<dyn NotificationSink>,
    validator: WorkflowValidator<D>,
    executions: Arc<DashMap<Uuid, ExecutionSlot>>,
}

impl<D: AgentDirectory + 'static> WorkflowEngine<D> {
    pub fn new(
        directory: Arc<D>,
        registry: Arc<AdapterRegistry>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            validator: WorkflowValidator::new(Arc::clone(&directory)),
            directory,
            registry,
            sink,
            executions: Arc::new(DashMap::new()),
        }
    }

    /// Start executing a definition. Returns the execution id as soon as the
    /// run is registered; the step loop proceeds on its own task.
    ///
    /// The definition is re-validated here as a defense against drift since
    /// creation. A dry run stops after validation and jumps straight to
    /// `Completed` without touching any adapter or timer.
    pub async fn start(
        &self,
        definition: &WorkflowDefinition,
        options: ExecuteOptions,
    ) -> Result<Uuid, EngineError> {
        if definition.status != WorkflowStatus::Active {
            return Err(EngineError::NotActive(definition.status));
        }
        let report = self.validator.validate(definition).await?;
        if !report.valid {
            return Err(EngineError::ValidationFailed(report));
        }

        let execution_id = Uuid::now_v7();
        let record = WorkflowExecution {
            id: execution_id,
            workflow_id: definition.id,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            context: ExecutionContext {
                variables: options.variables,
                step_outputs: std::collections::HashMap::new(),
                metadata: options.metadata,
            },
            steps: definition
                .steps
                .iter()
                .map(|step| StepExecution::pending(&step.id, step.agent_id))
                .collect(),
        };
        let record = Arc::new(RwLock::new(record));
        let cancel = CancellationToken::new();
        self.executions.insert(
            execution_id,
            ExecutionSlot {
                workflow_id: definition.id,
                record: Arc::clone(&record),
                cancel: cancel.clone(),
            },
        );
        self.sink
            .notify_status_change(execution_id, ExecutionStatus::Pending, None);

        if options.dry_run {
            {
                let mut rec = write(&record);
                rec.status = ExecutionStatus::Completed;
                rec.completed_at = Some(Utc::now());
                for step in &mut rec.steps {
                    step.status = StepStatus::Skipped;
                }
            }
            self.executions.remove(&execution_id);
            self.sink.notify_status_change(
                execution_id,
                ExecutionStatus::Completed,
                Some("dry run"),
            );
            tracing::info!(
                execution_id = %execution_id,
                workflow = definition.name.as_str(),
                "dry run completed"
            );
            return Ok(execution_id);
        }

        let driver = Driver {
            execution_id,
            definition: definition.clone(),
            record,
            cancel,
            directory: Arc::clone(&self.directory),
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            executions: Arc::clone(&self.executions),
        };
        tokio::spawn(driver.run());

        Ok(execution_id)
    }

    /// Snapshot of a live execution. `None` once it reaches a terminal
    /// status (terminal executions are dropped from the registry).
    pub fn get_execution(&self, execution_id: &Uuid) -> Option<WorkflowExecution> {
        self.executions
            .get(execution_id)
            .map(|slot| read(&slot.record).clone())
    }

    /// Progress of a live execution.
    pub fn progress(&self, execution_id: &Uuid) -> Option<ProgressSnapshot> {
        self.executions
            .get(execution_id)
            .map(|slot| progress_snapshot(&read(&slot.record)))
    }

    /// Cancel a live execution: the record flips to `Cancelled`, the
    /// currently running step (if any) becomes `Skipped`, and any pending
    /// backoff timer is aborted. Cooperative -- an adapter call already in
    /// flight is not preempted.
    pub fn cancel(&self, execution_id: &Uuid) -> Result<(), EngineError> {
        let (_, slot) = self
            .executions
            .remove(execution_id)
            .ok_or(EngineError::ExecutionNotFound(*execution_id))?;

        {
            let mut rec = write(&slot.record);
            rec.status = ExecutionStatus::Cancelled;
            rec.completed_at = Some(Utc::now());
            for step in &mut rec.steps {
                if step.status == StepStatus::Running {
                    step.status = StepStatus::Skipped;
                    step.completed_at = Some(Utc::now());
                }
            }
        }
        slot.cancel.cancel();
        self.sink.notify_status_change(
            *execution_id,
            ExecutionStatus::Cancelled,
            Some("cancelled by caller"),
        );
        tracing::info!(execution_id = %execution_id, "execution cancelled");
        Ok(())
    }

    /// Whether any live execution references the given workflow definition.
    pub fn has_active_execution(&self, workflow_id: &Uuid) -> bool {
        self.executions
            .iter()
            .any(|slot| slot.workflow_id == *workflow_id)
    }

    /// Ids of all live executions.
    pub fn active_execution_ids(&self) -> Vec<Uuid> {
        self.executions.iter().map(|slot| *slot.key()).collect()
    }

    /// Cancel every live execution. Call on shutdown.
    pub fn shutdown(&self) {
        for id in self.active_execution_ids() {
            let _ = self.cancel(&id);
        }
    }
}

/// Progress over an execution: finished steps (completed, skipped, or
/// failed) against the total, plus the step currently running.
pub fn progress_snapshot(execution: &WorkflowExecution) -> ProgressSnapshot {
    let total = execution.steps.len();
    let finished = execution
        .steps
        .iter()
        .filter(|s| {
            matches!(
                s.status,
                StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed
            )
        })
        .count();
    let percent = if total == 0 {
        0
    } else {
        ((finished * 100) as f64 / total as f64).round() as u8
    };
    ProgressSnapshot {
        execution_id: execution.id,
        status: execution.status,
        total_steps: total,
        completed_steps: finished,
        percent,
        current_step: execution.running_step().map(|s| s.step_id.clone()),
    }
}

// ---------------------------------------------------------------------------
// Condition evaluation
// ---------------------------------------------------------------------------

/// First-match-wins: the first condition in the list alone decides
/// participation. `Expression` conditions evaluate true (no expression
/// language is defined upstream).
fn step_passes(step: &WorkflowStep, execution: &WorkflowExecution) -> bool {
    match step.conditions.first() {
        None | Some(StepCondition::Always) | Some(StepCondition::Expression { .. }) => true,
        Some(StepCondition::OnSuccess { depends_on }) => depends_on
            .iter()
            .all(|dep| step_status(execution, dep) == Some(StepStatus::Completed)),
        Some(StepCondition::OnFailure { depends_on }) => {
            !depends_on.is_empty()
                && depends_on
                    .iter()
                    .any(|dep| step_status(execution, dep) == Some(StepStatus::Failed))
        }
    }
}

fn step_status(execution: &WorkflowExecution, step_id: &str) -> Option<StepStatus> {
    execution
        .steps
        .iter()
        .find(|s| s.step_id == step_id)
        .map(|s| s.status)
}

/// A failed step only aborts the execution when no step in the definition
/// carries an `on_failure` condition naming it -- such a branch means the
/// author planned for this failure.
fn has_failure_branch(definition: &WorkflowDefinition, failed_step: &str) -> bool {
    definition.steps.iter().any(|step| {
        step.conditions.iter().any(|condition| {
            matches!(
                condition,
                StepCondition::OnFailure { depends_on }
                    if depends_on.iter().any(|dep| dep == failed_step)
            )
        })
    })
}

// ---------------------------------------------------------------------------
// Driver (the per-execution task)
// ---------------------------------------------------------------------------

enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

enum StepResult {
    Success { output: Value, retries: u32 },
    Failure { error: String, retries: u32 },
}

struct Driver<D: AgentDirectory> {
    execution_id: Uuid,
    definition: WorkflowDefinition,
    record: Arc<RwLock<WorkflowExecution>>,
    cancel: CancellationToken,
    directory: Arc<D>,
    registry: Arc<AdapterRegistry>,
    sink: Arc<dyn NotificationSink>,
    executions: Arc<DashMap<Uuid, ExecutionSlot>>,
}

impl<D: AgentDirectory + 'static> Driver<D> {
    /// Top of the per-execution task: no error escapes this function.
    async fn run(self) {
        match self.drive().await {
            Outcome::Completed => self.finalize_success(),
            // cancel() already finalized the record and deregistered.
            Outcome::Cancelled => {}
            Outcome::Failed(message) => self.finalize_failure(message),
        }
    }

    async fn drive(&self) -> Outcome {
        {
            let mut rec = write(&self.record);
            rec.status = ExecutionStatus::Running;
            rec.started_at = Some(Utc::now());
        }
        self.sink
            .notify_status_change(self.execution_id, ExecutionStatus::Running, None);
        tracing::info!(
            execution_id = %self.execution_id,
            workflow = self.definition.name.as_str(),
            steps = self.definition.steps.len(),
            "execution started"
        );

        // Steps run strictly in declared order; the validator's dependency
        // graph is analysis-only and does not reorder anything here.
        for index in 0..self.definition.steps.len() {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            let step = &self.definition.steps[index];

            let passes = {
                let rec = read(&self.record);
                step_passes(step, &rec)
            };
            if !passes {
                let mut rec = write(&self.record);
                rec.steps[index].status = StepStatus::Skipped;
                rec.steps[index].completed_at = Some(Utc::now());
                drop(rec);
                tracing::debug!(step_id = step.id.as_str(), "step skipped by condition");
                continue;
            }

            let params = {
                let mut rec = write(&self.record);
                rec.steps[index].status = StepStatus::Running;
                rec.steps[index].started_at = Some(Utc::now());
                let params = resolve_parameters(&step.parameters, &rec.context);
                rec.steps[index].input = Some(params.clone());
                params
            };
            self.emit_progress();

            let started = Instant::now();
            let result = self.run_step(step, &params).await;
            if self.cancel.is_cancelled() {
                // cancel() already marked this step skipped; a late adapter
                // result must not overwrite that.
                return Outcome::Cancelled;
            }
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                StepResult::Success { output, retries } => {
                    {
                        let mut rec = write(&self.record);
                        let entry = &mut rec.steps[index];
                        entry.status = StepStatus::Completed;
                        entry.output = Some(output.clone());
                        entry.retry_count = retries;
                        entry.completed_at = Some(Utc::now());
                        entry.duration_ms = Some(elapsed_ms);
                        rec.context.step_outputs.insert(step.id.clone(), output);
                    }
                    tracing::info!(
                        step_id = step.id.as_str(),
                        retries,
                        elapsed_ms,
                        "step completed"
                    );
                    self.emit_progress();
                }
                StepResult::Failure { error, retries } => {
                    {
                        let mut rec = write(&self.record);
                        let entry = &mut rec.steps[index];
                        entry.status = StepStatus::Failed;
                        entry.error = Some(error.clone());
                        entry.retry_count = retries;
                        entry.completed_at = Some(Utc::now());
                        entry.duration_ms = Some(elapsed_ms);
                    }
                    tracing::warn!(
                        step_id = step.id.as_str(),
                        retries,
                        error = error.as_str(),
                        "step failed"
                    );
                    if has_failure_branch(&self.definition, &step.id) {
                        self.emit_progress();
                        continue;
                    }
                    return Outcome::Failed(format!("step '{}' failed: {error}", step.id));
                }
            }
        }

        Outcome::Completed
    }

    /// One step: resolve agent and adapter, then attempt the call through
    /// the circuit breaker with bounded retries. Attempt numbering is
    /// 0-based; `retries` reports how many retries were consumed.
    async fn run_step(&self, step: &WorkflowStep, params: &Value) -> StepResult {
        let agent = match self.directory.get_agent(step.agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                return StepResult::Failure {
                    error: format!("agent {} not found", step.agent_id),
                    retries: 0,
                };
            }
            Err(err) => {
                return StepResult::Failure {
                    error: format!("agent lookup failed: {err}"),
                    retries: 0,
                };
            }
        };
        let Some(handle) = self.registry.get(&agent.platform_id) else {
            return StepResult::Failure {
                error: format!("no adapter registered for platform {}", agent.platform_id),
                retries: 0,
            };
        };

        let retry = step.retry.clone().unwrap_or_default();
        let timeout = Duration::from_secs(step.timeout_secs());
        let mut attempt: u32 = 0;

        loop {
            let call = handle
                .breaker
                .execute(|| async {
                    match tokio::time::timeout(
                        timeout,
                        handle.adapter.execute_agent(&agent.external_id, params),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(AdapterError::Timeout),
                    }
                })
                .await;

            let error = match call {
                Ok(response) if response.success => {
                    return StepResult::Success {
                        output: response.data.unwrap_or(Value::Null),
                        retries: attempt,
                    };
                }
                Ok(response) => response
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
                Err(CircuitError::Open { retry_in }) => {
                    // Fast-fail: the call never happened, so no retry
                    // attempt is consumed.
                    return StepResult::Failure {
                        error: format!(
                            "circuit open for platform '{}', next attempt in {}ms",
                            handle.adapter.platform_name(),
                            retry_in.as_millis()
                        ),
                        retries: attempt,
                    };
                }
                Err(CircuitError::Inner(err)) => err.to_string(),
            };

            if attempt >= retry.max_retries {
                return StepResult::Failure {
                    error,
                    retries: attempt,
                };
            }

            let delay = backoff_delay(&retry, attempt);
            tracing::debug!(
                step_id = step.id.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = error.as_str(),
                "step attempt failed, backing off"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return StepResult::Failure {
                        error: "cancelled during backoff".to_string(),
                        retries: attempt,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn emit_progress(&self) {
        let snapshot = {
            let rec = read(&self.record);
            progress_snapshot(&rec)
        };
        self.sink.notify_progress(self.execution_id, &snapshot);
    }

    fn finalize_success(&self) {
        {
            let mut rec = write(&self.record);
            rec.status = ExecutionStatus::Completed;
            rec.completed_at = Some(Utc::now());
        }
        self.executions.remove(&self.execution_id);
        self.emit_progress();
        self.sink
            .notify_status_change(self.execution_id, ExecutionStatus::Completed, None);
        tracing::info!(execution_id = %self.execution_id, "execution completed");
    }

    fn finalize_failure(&self, message: String) {
        {
            let mut rec = write(&self.record);
            rec.status = ExecutionStatus::Failed;
            rec.error = Some(message.clone());
            rec.completed_at = Some(Utc::now());
        }
        self.executions.remove(&self.execution_id);
        self.sink.notify_error(self.execution_id, &message, None);
        self.sink.notify_status_change(
            self.execution_id,
            ExecutionStatus::Failed,
            Some(&message),
        );
        tracing::warn!(
            execution_id = %self.execution_id,
            error = message.as_str(),
            "execution failed"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
