//! Workflow templates and execution records.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::graph::StepGraph;
use crate::error::Result;
use crate::protocol::{MessageType, Payload};

/// Default per-step response timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Unique identifier for one run of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID, for logs.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One unit of work in a workflow, dispatched to an agent of `agent_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    pub agent_type: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    pub timeout: Duration,
    /// Additional attempts after the first failure.
    #[serde(default)]
    pub retry_count: u32,
}

impl WorkflowStep {
    pub fn new(step_id: &str, agent_type: &str, message_type: impl Into<MessageType>) -> Self {
        Self {
            step_id: step_id.to_string(),
            agent_type: agent_type.to_string(),
            message_type: message_type.into(),
            payload: Payload::new(),
            depends_on: BTreeSet::new(),
            timeout: DEFAULT_STEP_TIMEOUT,
            retry_count: 0,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn depends_on<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Total attempts allowed before the step counts as failed.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

/// A reusable DAG of steps. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(workflow_id: &str, name: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            steps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Check step id uniqueness, dangling dependencies and cycles.
    pub fn validate(&self) -> Result<()> {
        StepGraph::build(&self.steps).map(|_| ())
    }
}

/// Lifecycle of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_steps: BTreeSet<String>,
    pub failed_steps: BTreeSet<String>,
    pub step_results: BTreeMap<String, Value>,
    /// First unrecoverable failure, if any.
    pub error: Option<String>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: &str) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            completed_steps: BTreeSet::new(),
            failed_steps: BTreeSet::new(),
            step_results: BTreeMap::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }
}
