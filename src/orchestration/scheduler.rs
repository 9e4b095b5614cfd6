//! Workflow execution state machine.
//!
//! The `WorkflowEngine` owns registered workflow templates and live
//! executions. It never performs I/O: `start` and `record` return the step
//! dispatches the caller must send, which keeps every state change a single
//! synchronous update.
//!
//! Policy:
//! - a step becomes ready once every id in `depends_on` is completed;
//! - a failed attempt is retried until the step has run `retry_count + 1`
//!   times;
//! - the first step to exhaust its attempts fails the execution, after which
//!   nothing new is dispatched. Results of steps already in flight are still
//!   recorded.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{MessageType, Payload};
use crate::workflow::{
    ExecutionId, ExecutionStatus, StepGraph, Workflow, WorkflowExecution, WorkflowStep,
};

/// Payload key carrying execution context into each step message.
pub const WORKFLOW_CONTEXT_KEY: &str = "workflow_context";

/// One step attempt to be sent to an agent of `agent_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDispatch {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub step_id: String,
    pub agent_type: String,
    pub message_type: MessageType,
    /// Step payload template plus the `workflow_context` object.
    pub payload: Payload,
    pub timeout: Duration,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Result of one step attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded(Value),
    Failed(String),
}

struct RegisteredWorkflow {
    workflow: Workflow,
    graph: StepGraph,
}

struct ExecutionState {
    execution: WorkflowExecution,
    /// Steps dispatched at least once.
    dispatched: BTreeSet<String>,
    /// Attempts made per step.
    attempts: HashMap<String, u32>,
}

#[derive(Default)]
pub struct WorkflowEngine {
    workflows: HashMap<String, RegisteredWorkflow>,
    executions: HashMap<ExecutionId, ExecutionState>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a workflow template.
    pub fn register(&mut self, workflow: Workflow) -> Result<()> {
        if self.workflows.contains_key(&workflow.workflow_id) {
            return Err(Error::Validation(format!(
                "workflow {} is already registered",
                workflow.workflow_id
            )));
        }
        let graph = StepGraph::build(&workflow.steps)?;
        info!(
            workflow_id = %workflow.workflow_id,
            steps = workflow.steps.len(),
            "workflow registered"
        );
        self.workflows.insert(
            workflow.workflow_id.clone(),
            RegisteredWorkflow { workflow, graph },
        );
        Ok(())
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<&Workflow> {
        self.workflows.get(workflow_id).map(|r| &r.workflow)
    }

    /// Registered templates sorted by id.
    pub fn workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> =
            self.workflows.values().map(|r| r.workflow.clone()).collect();
        workflows.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        workflows
    }

    pub fn execution(&self, execution_id: &ExecutionId) -> Option<WorkflowExecution> {
        self.executions
            .get(execution_id)
            .map(|state| state.execution.clone())
    }

    /// Number of executions not yet terminal.
    pub fn active_executions(&self) -> usize {
        self.executions
            .values()
            .filter(|state| !state.execution.is_terminal())
            .count()
    }

    /// Create an execution and return the initial dispatches.
    ///
    /// A workflow without steps completes immediately.
    pub fn start(&mut self, workflow_id: &str) -> Result<(ExecutionId, Vec<StepDispatch>)> {
        let registered = self
            .workflows
            .get(workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?;

        let mut state = ExecutionState {
            execution: WorkflowExecution::new(workflow_id),
            dispatched: BTreeSet::new(),
            attempts: HashMap::new(),
        };
        state.execution.mark_running();
        let execution_id = state.execution.execution_id;
        info!(%execution_id, workflow_id, "execution started");

        let dispatches = if registered.graph.is_empty() {
            state.execution.mark_completed();
            info!(%execution_id, "execution completed (no steps)");
            Vec::new()
        } else {
            advance(registered, &mut state)
        };

        self.executions.insert(execution_id, state);
        Ok((execution_id, dispatches))
    }

    /// Record the outcome of one step attempt and return what to dispatch
    /// next.
    pub fn record(
        &mut self,
        execution_id: &ExecutionId,
        step_id: &str,
        outcome: StepOutcome,
    ) -> Result<Vec<StepDispatch>> {
        let state = self
            .executions
            .get_mut(execution_id)
            .ok_or(Error::ExecutionNotFound(*execution_id))?;
        let registered = self
            .workflows
            .get(&state.execution.workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound(state.execution.workflow_id.clone()))?;
        let step = registered.workflow.step(step_id).ok_or_else(|| {
            Error::Validation(format!(
                "step {} is not part of workflow {}",
                step_id, registered.workflow.workflow_id
            ))
        })?;

        let execution = &mut state.execution;
        if !state.dispatched.contains(step_id)
            || execution.completed_steps.contains(step_id)
            || execution.failed_steps.contains(step_id)
        {
            warn!(%execution_id, step_id, "outcome for step not in flight, ignoring");
            return Ok(Vec::new());
        }

        match outcome {
            StepOutcome::Succeeded(result) => {
                debug!(%execution_id, step_id, "step completed");
                execution.completed_steps.insert(step_id.to_string());
                execution.step_results.insert(step_id.to_string(), result);

                if execution.is_terminal() {
                    return Ok(Vec::new());
                }
                if registered.graph.all_complete(&execution.completed_steps) {
                    execution.mark_completed();
                    info!(%execution_id, "execution completed");
                    return Ok(Vec::new());
                }
                Ok(advance(registered, state))
            }
            StepOutcome::Failed(error) => {
                let attempts = state.attempts.get(step_id).copied().unwrap_or(0);
                if execution.is_terminal() {
                    execution.failed_steps.insert(step_id.to_string());
                    return Ok(Vec::new());
                }
                if attempts < step.max_attempts() {
                    warn!(
                        %execution_id,
                        step_id,
                        attempt = attempts,
                        max_attempts = step.max_attempts(),
                        %error,
                        "step attempt failed, retrying"
                    );
                    return Ok(vec![dispatch(registered, state, step)]);
                }

                execution.failed_steps.insert(step_id.to_string());
                let message = format!(
                    "step {} failed after {} attempt(s): {}",
                    step_id, attempts, error
                );
                warn!(%execution_id, step_id, %error, "execution failed");
                execution.mark_failed(message);
                Ok(Vec::new())
            }
        }
    }

    pub fn status(&self, execution_id: &ExecutionId) -> Option<ExecutionStatus> {
        self.executions
            .get(execution_id)
            .map(|state| state.execution.status)
    }
}

/// Dispatch every newly ready step.
fn advance(registered: &RegisteredWorkflow, state: &mut ExecutionState) -> Vec<StepDispatch> {
    let ready: Vec<String> = registered
        .graph
        .ready_steps(&state.execution.completed_steps, &state.dispatched)
        .into_iter()
        .map(str::to_string)
        .collect();

    ready
        .iter()
        .filter_map(|step_id| registered.workflow.step(step_id))
        .map(|step| dispatch(registered, state, step))
        .collect()
}

fn dispatch(
    registered: &RegisteredWorkflow,
    state: &mut ExecutionState,
    step: &WorkflowStep,
) -> StepDispatch {
    let attempt = {
        let attempts = state.attempts.entry(step.step_id.clone()).or_insert(0);
        *attempts += 1;
        *attempts
    };
    state.dispatched.insert(step.step_id.clone());

    let execution = &state.execution;
    let dependency_results: Map<String, Value> = step
        .depends_on
        .iter()
        .map(|dep| {
            let result = execution.step_results.get(dep).cloned().unwrap_or(Value::Null);
            (dep.clone(), result)
        })
        .collect();

    let mut payload = step.payload.clone();
    payload.insert(
        WORKFLOW_CONTEXT_KEY.to_string(),
        json!({
            "execution_id": execution.execution_id,
            "workflow_id": registered.workflow.workflow_id,
            "step_id": step.step_id,
            "attempt": attempt,
            "dependency_results": dependency_results,
        }),
    );

    debug!(
        execution_id = %execution.execution_id,
        step_id = %step.step_id,
        agent_type = %step.agent_type,
        attempt,
        "step ready"
    );

    StepDispatch {
        execution_id: execution.execution_id,
        workflow_id: registered.workflow.workflow_id.clone(),
        step_id: step.step_id.clone(),
        agent_type: step.agent_type.clone(),
        message_type: step.message_type.clone(),
        payload,
        timeout: step.timeout,
        attempt,
    }
}
