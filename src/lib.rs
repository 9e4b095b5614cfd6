//! Agent orchestration and messaging over a publish/subscribe transport.
//!
//! Agents embed an [`AgentRuntime`] that registers with an [`Orchestrator`],
//! heartbeats, and answers [`AgentMessage`]s through a [`MessageBus`]. The
//! orchestrator keeps a registry of live agents and runs workflows expressed
//! as step dependency graphs.

pub mod actors;
pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod protocol;
pub mod transport;
pub mod workflow;

pub use agent::{
    Agent, AgentCapability, AgentId, AgentMetadata, AgentRuntime, AgentStatus, HandlerResult,
};
pub use bus::MessageBus;
pub use config::Config;
pub use error::{Error, Result};
pub use orchestration::Orchestrator;
pub use protocol::{AgentMessage, AgentResponse, MessageType, Payload};
pub use transport::{MemoryBroker, Transport};
pub use workflow::{ExecutionId, ExecutionStatus, Workflow, WorkflowExecution, WorkflowStep};
