//! Workflow templates, execution records and the step dependency graph.

mod graph;
mod types;

pub use graph::StepGraph;
pub use types::{
    ExecutionId, ExecutionStatus, Workflow, WorkflowExecution, WorkflowStep, DEFAULT_STEP_TIMEOUT,
};
