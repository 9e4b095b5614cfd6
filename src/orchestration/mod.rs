//! Orchestration layer: agent registry, stale-agent detection, the workflow
//! engine and the coordinator that ties them to the message bus.

mod health;
mod orchestrator;
mod registry;
mod scheduler;

pub use health::{HealthConfig, HealthEvent, HealthMonitor};
pub use orchestrator::Orchestrator;
pub use registry::RegistryStore;
pub use scheduler::{StepDispatch, StepOutcome, WorkflowEngine, WORKFLOW_CONTEXT_KEY};
