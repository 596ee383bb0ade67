//! End-to-end flows over the in-memory ports: service -> store -> engine ->
//! adapter -> broadcast sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;

use maestro_core::adapter::{
    AdapterError, AdapterRegistry, AdapterResponse, AgentAdapter, DiscoveredAgent,
};
use maestro_core::service::workflow::{
    CreateWorkflowRequest, UpdateWorkflowRequest, WorkflowService, WorkflowServiceError,
};
use maestro_core::workflow::engine::{ExecuteOptions, WorkflowEngine};
use maestro_infra::memory::{InMemoryAgentDirectory, InMemoryWorkflowStore};
use maestro_infra::notify::{BroadcastSink, ExecutionEvent};
use maestro_types::agent::{Agent, AgentStatus};
use maestro_types::execution::ExecutionStatus;
use maestro_types::workflow::{RetryConfig, StepCondition, WorkflowStatus, WorkflowStep};

// ---------------------------------------------------------------------------
// Scripted platform adapter
// ---------------------------------------------------------------------------

/// Replays a queue of responses per agent; empty queues succeed by echoing
/// the received parameters.
#[derive(Clone, Default)]
struct ReplayAdapter {
    responses: Arc<Mutex<HashMap<String, Vec<Result<AdapterResponse, String>>>>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ReplayAdapter {
    fn push_failure(&self, external_id: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(external_id.to_string())
            .or_default()
            .push(Ok(AdapterResponse::failed(message)));
    }

    fn push_transport_error(&self, external_id: &str) {
        self.responses
            .lock()
            .unwrap()
            .entry(external_id.to_string())
            .or_default()
            .push(Err("connection reset".to_string()));
    }

    fn calls_for(&self, external_id: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(ext, _)| ext == external_id)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

impl AgentAdapter for ReplayAdapter {
    fn platform_name(&self) -> &str {
        "replay"
    }

    async fn authenticate(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn discover_agents(&self) -> Result<Vec<DiscoveredAgent>, AdapterError> {
        Ok(vec![])
    }

    async fn agent_status(&self, _external_id: &str) -> Result<AgentStatus, AdapterError> {
        Ok(AgentStatus::Active)
    }

    async fn execute_agent(
        &self,
        external_id: &str,
        params: &Value,
    ) -> Result<AdapterResponse, AdapterError> {
        self.calls
            .lock()
            .unwrap()
            .push((external_id.to_string(), params.clone()));

        let next = {
            let mut responses = self.responses.lock().unwrap();
            responses
                .get_mut(external_id)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
        };
        match next {
            None => Ok(AdapterResponse::ok(json!({"echo": params}))),
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(AdapterError::Transport(message)),
        }
    }

    async fn health_check(&self) -> Result<bool, AdapterError> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

struct World {
    service: WorkflowService<InMemoryWorkflowStore, InMemoryAgentDirectory>,
    sink: BroadcastSink,
    adapter: ReplayAdapter,
    agents: HashMap<&'static str, Uuid>,
}

fn world(agent_names: &[&'static str]) -> World {
    let platform_id = Uuid::now_v7();
    let directory = Arc::new(InMemoryAgentDirectory::new());
    let mut agents = HashMap::new();
    for name in agent_names {
        let agent = Agent {
            id: Uuid::now_v7(),
            name: name.to_string(),
            platform_id,
            external_id: name.to_string(),
            status: AgentStatus::Active,
        };
        agents.insert(*name, agent.id);
        directory.insert(agent);
    }

    let adapter = ReplayAdapter::default();
    let registry = Arc::new(AdapterRegistry::new());
    registry.register(platform_id, adapter.clone());

    let sink = BroadcastSink::new(256);
    let engine = Arc::new(WorkflowEngine::new(
        Arc::clone(&directory),
        registry,
        Arc::new(sink.clone()),
    ));
    let service = WorkflowService::new(
        InMemoryWorkflowStore::new(),
        Arc::clone(&directory),
        engine,
    );

    World {
        service,
        sink,
        adapter,
        agents,
    }
}

impl World {
    fn step(&self, id: &str, agent: &str, order: u32) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            agent_id: self.agents[agent],
            step_order: order,
            name: id.to_string(),
            parameters: HashMap::new(),
            conditions: vec![StepCondition::Always],
            retry: Some(RetryConfig {
                max_retries: 0,
                backoff_ms: 1,
                backoff_multiplier: 2.0,
                max_backoff_ms: 10,
            }),
            timeout_secs: Some(5),
        }
    }

    async fn create_active(&self, steps: Vec<WorkflowStep>) -> Uuid {
        self.service
            .create_workflow(CreateWorkflowRequest {
                name: "pipeline".to_string(),
                description: None,
                status: Some(WorkflowStatus::Active),
                steps,
                created_by: "it".to_string(),
            })
            .await
            .unwrap()
            .id
    }
}

/// Drain sink events until the execution hits a terminal status.
async fn collect_until_terminal(
    rx: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>,
) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for events")
            .expect("sink channel closed");
        let terminal = matches!(
            &event,
            ExecutionEvent::StatusChanged { status, .. } if status.is_terminal()
        );
        events.push(event);
        if terminal {
            return events;
        }
    }
}

fn statuses(events: &[ExecutionEvent]) -> Vec<ExecutionStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StatusChanged { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_pipeline_with_variable_flow() {
    let w = world(&["extract", "transform"]);
    let mut second = w.step("transform", "transform", 2);
    second.parameters = HashMap::from([
        ("input".to_string(), json!("${extract.echo.source}")),
        ("region".to_string(), json!("${region}")),
    ]);
    let mut first = w.step("extract", "extract", 1);
    first.parameters = HashMap::from([("source".to_string(), json!("crm"))]);
    // Declared out of order on purpose: the service normalizes by step_order.
    let workflow_id = w.create_active(vec![second, first]).await;

    let mut rx = w.sink.subscribe();
    let options = ExecuteOptions {
        variables: HashMap::from([("region".to_string(), json!("eu-west"))]),
        ..Default::default()
    };
    let execution_id = w
        .service
        .execute_workflow(&workflow_id, options, "it")
        .await
        .unwrap();

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(
        statuses(&events),
        vec![
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed
        ]
    );

    // The transform step saw the extract step's output and the run variable.
    let transform_calls = w.adapter.calls_for("transform");
    assert_eq!(transform_calls.len(), 1);
    assert_eq!(transform_calls[0]["input"], json!("crm"));
    assert_eq!(transform_calls[0]["region"], json!("eu-west"));

    // Terminal executions are gone from the live registry.
    assert!(w.service.get_execution(&execution_id).is_none());
    assert!(w.service.get_progress(&execution_id).is_none());
}

#[tokio::test]
async fn failure_branch_recovers_and_completes() {
    let w = world(&["fragile", "cleanup", "report"]);
    w.adapter.push_failure("fragile", "upstream rejected the job");

    let first = w.step("ingest", "fragile", 1);
    let mut recover = w.step("cleanup", "cleanup", 2);
    recover.conditions = vec![StepCondition::OnFailure {
        depends_on: vec!["ingest".to_string()],
    }];
    let report = w.step("report", "report", 3);
    let workflow_id = w.create_active(vec![first, recover, report]).await;

    let mut rx = w.sink.subscribe();
    w.service
        .execute_workflow(&workflow_id, ExecuteOptions::default(), "it")
        .await
        .unwrap();

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(statuses(&events).last(), Some(&ExecutionStatus::Completed));
    assert_eq!(w.adapter.calls_for("cleanup").len(), 1);
    assert_eq!(w.adapter.calls_for("report").len(), 1);
}

#[tokio::test]
async fn unrecovered_failure_emits_error_event() {
    let w = world(&["fragile", "after"]);
    // Transport failure, one retry, still failing.
    w.adapter.push_transport_error("fragile");
    w.adapter.push_transport_error("fragile");

    let mut first = w.step("ingest", "fragile", 1);
    first.retry = Some(RetryConfig {
        max_retries: 1,
        backoff_ms: 1,
        backoff_multiplier: 2.0,
        max_backoff_ms: 5,
    });
    let second = w.step("after", "after", 2);
    let workflow_id = w.create_active(vec![first, second]).await;

    let mut rx = w.sink.subscribe();
    w.service
        .execute_workflow(&workflow_id, ExecuteOptions::default(), "it")
        .await
        .unwrap();

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(statuses(&events).last(), Some(&ExecutionStatus::Failed));
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::Error { message, .. } if message.contains("ingest")
    )));
    assert_eq!(w.adapter.calls_for("fragile").len(), 2);
    assert!(w.adapter.calls_for("after").is_empty());
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let w = world(&["extract"]);
    let workflow_id = w.create_active(vec![w.step("extract", "extract", 1)]).await;

    let mut rx = w.sink.subscribe();
    let options = ExecuteOptions {
        dry_run: true,
        ..Default::default()
    };
    w.service
        .execute_workflow(&workflow_id, options, "it")
        .await
        .unwrap();

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(
        statuses(&events),
        vec![ExecutionStatus::Pending, ExecutionStatus::Completed]
    );
    assert!(w.adapter.calls_for("extract").is_empty());
}

#[tokio::test]
async fn cancellation_mid_backoff() {
    let w = world(&["fragile", "after"]);
    w.adapter.push_transport_error("fragile");

    let mut first = w.step("ingest", "fragile", 1);
    first.retry = Some(RetryConfig {
        max_retries: 3,
        backoff_ms: 10_000,
        backoff_multiplier: 2.0,
        max_backoff_ms: 30_000,
    });
    let second = w.step("after", "after", 2);
    let workflow_id = w.create_active(vec![first, second]).await;

    let mut rx = w.sink.subscribe();
    let execution_id = w
        .service
        .execute_workflow(&workflow_id, ExecuteOptions::default(), "it")
        .await
        .unwrap();

    // Wait for the first attempt, then cancel during the long backoff.
    for _ in 0..500 {
        if !w.adapter.calls_for("fragile").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    w.service.cancel_execution(&execution_id).unwrap();

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(statuses(&events).last(), Some(&ExecutionStatus::Cancelled));
    assert_eq!(w.adapter.calls_for("fragile").len(), 1);
    assert!(w.adapter.calls_for("after").is_empty());

    // The workflow is free for mutation again.
    w.service
        .update_workflow(&workflow_id, UpdateWorkflowRequest::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn validation_gate_blocks_execution() {
    let w = world(&["extract"]);
    let workflow_id = w.create_active(vec![w.step("extract", "extract", 1)]).await;

    // Drop the agent after creation: execution re-validates and refuses.
    let mut broken = w.step("extract", "extract", 1);
    broken.agent_id = Uuid::now_v7();
    let result = w
        .service
        .update_workflow(
            &workflow_id,
            UpdateWorkflowRequest {
                steps: Some(vec![broken]),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(WorkflowServiceError::Validation(_))));
}
