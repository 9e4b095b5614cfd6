use thiserror::Error;

use crate::agent::AgentStatus;
use crate::workflow::ExecutionId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: AgentStatus, to: AgentStatus },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
