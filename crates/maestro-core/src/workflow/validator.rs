//! Static analysis over workflow definitions.
//!
//! `validate` never fails for data-quality problems: every finding is
//! returned as a structured error or warning, and `valid` is simply
//! "no errors". Checks run in a fixed order (structure, agents, cycles,
//! reachability, conditions) and iterate steps in declared order, so
//! validating the same definition twice yields identical reports.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use maestro_types::error::StoreError;
use maestro_types::workflow::{StepCondition, WorkflowDefinition};

use crate::adapter::AgentDirectory;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Machine-readable classification of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    EmptyWorkflow,
    DuplicateStepId,
    MissingAgent,
    MissingDependency,
    CircularDependency,
    UnreachableStep,
    InvalidCondition,
    UnknownStepReference,
}

/// One validation finding, tied to a step where applicable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: IssueCode, step_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            step_id: step_id.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Outcome of validating a definition. Warnings never block execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn new(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Validates workflow definitions against the agent directory and the
/// step dependency graph.
pub struct WorkflowValidator<D: AgentDirectory> {
    directory: Arc<D>,
}

impl<D: AgentDirectory> WorkflowValidator<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }

    /// Run all checks. `Err` is reserved for directory/store failures;
    /// every data-quality problem lands in the report.
    pub async fn validate(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<ValidationReport, StoreError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        check_structure(definition, &mut errors);
        self.check_agents(definition, &mut errors, &mut warnings)
            .await?;
        check_cycles(definition, &mut errors);
        check_reachability(definition, &mut warnings);
        check_conditions(definition, &mut errors);

        let report = ValidationReport::new(errors, warnings);
        tracing::debug!(
            workflow_id = %definition.id,
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "workflow validated"
        );
        Ok(report)
    }

    /// Every step's agent must exist; inactive agents are a warning only.
    async fn check_agents(
        &self,
        definition: &WorkflowDefinition,
        errors: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationIssue>,
    ) -> Result<(), StoreError> {
        for step in &definition.steps {
            match self.directory.get_agent(step.agent_id).await? {
                None => errors.push(ValidationIssue::new(
                    IssueCode::MissingAgent,
                    Some(&step.id),
                    format!("step '{}' references unknown agent {}", step.id, step.agent_id),
                )),
                Some(agent) if !agent.status.is_active() => {
                    warnings.push(ValidationIssue::new(
                        IssueCode::MissingDependency,
                        Some(&step.id),
                        format!(
                            "step '{}' references agent '{}' which is not active",
                            step.id, agent.name
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Structural checks
// ---------------------------------------------------------------------------

fn check_structure(definition: &WorkflowDefinition, errors: &mut Vec<ValidationIssue>) {
    if definition.steps.is_empty() {
        errors.push(ValidationIssue::new(
            IssueCode::EmptyWorkflow,
            None,
            "workflow must have at least one step",
        ));
        return;
    }

    let mut seen = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.id.as_str()) {
            errors.push(ValidationIssue::new(
                IssueCode::DuplicateStepId,
                Some(&step.id),
                format!("duplicate step id: '{}'", step.id),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Dependency edges per step (deduplicated, unknown references excluded --
/// those are reported by the condition check).
fn dependency_edges<'a>(
    definition: &'a WorkflowDefinition,
) -> HashMap<&'a str, Vec<&'a str>> {
    let known: HashSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
    definition
        .steps
        .iter()
        .map(|step| {
            let deps: Vec<&str> = step
                .dependency_ids()
                .into_iter()
                .filter(|dep| known.contains(dep))
                .collect();
            (step.id.as_str(), deps)
        })
        .collect()
}

/// Depth-first search with an explicit recursion stack. A dependency found
/// on the current stack closes a cycle, reported as the full path. Nodes
/// already fully explored are never re-descended, so graphs with shared
/// sub-dependencies terminate.
fn check_cycles(definition: &WorkflowDefinition, errors: &mut Vec<ValidationIssue>) {
    let edges = dependency_edges(definition);
    let mut on_stack: Vec<&str> = Vec::new();
    let mut visiting: HashSet<&str> = HashSet::new();
    let mut done: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        on_stack: &mut Vec<&'a str>,
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
        errors: &mut Vec<ValidationIssue>,
    ) {
        visiting.insert(node);
        on_stack.push(node);

        for &dep in edges.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            if visiting.contains(dep) {
                // Close the cycle: everything from dep's stack position on.
                let start = on_stack.iter().position(|&n| n == dep).unwrap_or(0);
                let mut path: Vec<&str> = on_stack[start..].to_vec();
                path.push(dep);
                errors.push(ValidationIssue::new(
                    IssueCode::CircularDependency,
                    Some(dep),
                    format!("circular dependency: {}", path.join(" -> ")),
                ));
            } else if !done.contains(dep) {
                visit(dep, edges, on_stack, visiting, done, errors);
            }
        }

        on_stack.pop();
        visiting.remove(node);
        done.insert(node);
    }

    for step in &definition.steps {
        if !done.contains(step.id.as_str()) {
            visit(
                step.id.as_str(),
                &edges,
                &mut on_stack,
                &mut visiting,
                &mut done,
                errors,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Reachability
// ---------------------------------------------------------------------------

/// Breadth-first traversal from entry points over inverted edges
/// (dependency -> dependent). Steps never reached get a warning.
///
/// Entry points are steps with no dependencies in any condition. When none
/// exist and the step list is non-empty, the first declared step is taken
/// as the sole entry point.
fn check_reachability(definition: &WorkflowDefinition, warnings: &mut Vec<ValidationIssue>) {
    if definition.steps.is_empty() {
        return;
    }

    let edges = dependency_edges(definition);
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (step_id, deps) in &edges {
        for dep in deps {
            dependents.entry(*dep).or_default().push(*step_id);
        }
    }

    let mut entry_points: Vec<&str> = definition
        .steps
        .iter()
        .filter(|s| edges.get(s.id.as_str()).is_none_or(Vec::is_empty))
        .map(|s| s.id.as_str())
        .collect();
    if entry_points.is_empty() {
        entry_points.push(definition.steps[0].id.as_str());
    }

    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = entry_points.into_iter().collect();
    while let Some(node) = queue.pop_front() {
        if !reached.insert(node) {
            continue;
        }
        for &dependent in dependents.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            if !reached.contains(dependent) {
                queue.push_back(dependent);
            }
        }
    }

    for step in &definition.steps {
        if !reached.contains(step.id.as_str()) {
            warnings.push(ValidationIssue::new(
                IssueCode::UnreachableStep,
                Some(&step.id),
                format!("step '{}' is not reachable from any entry point", step.id),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Condition well-formedness
// ---------------------------------------------------------------------------

fn check_conditions(definition: &WorkflowDefinition, errors: &mut Vec<ValidationIssue>) {
    let known: HashSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();

    for step in &definition.steps {
        for condition in &step.conditions {
            if let StepCondition::Expression { expression } = condition {
                if expression.trim().is_empty() {
                    errors.push(ValidationIssue::new(
                        IssueCode::InvalidCondition,
                        Some(&step.id),
                        format!("step '{}' has an expression condition without an expression", step.id),
                    ));
                }
            }
            for dep in condition.depends_on() {
                if !known.contains(dep.as_str()) {
                    errors.push(ValidationIssue::new(
                        IssueCode::UnknownStepReference,
                        Some(&step.id),
                        format!("step '{}' depends on unknown step '{}'", step.id, dep),
                    ));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
