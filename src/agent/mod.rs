//! Agent identity, lifecycle status and metadata.
//!
//! The owning runtime holds the authoritative [`AgentMetadata`]; the
//! orchestrator keeps an independent copy rebuilt from registration and
//! heartbeat messages.

pub mod runtime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{Error, Result};

pub use runtime::{Agent, AgentRuntime, HandlerError, HandlerResult};

/// Version reported by agents that do not override [`Agent::version`].
pub const DEFAULT_AGENT_VERSION: &str = "1.0.0";

/// Unique identifier of an agent instance, also used in channel names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Generate an id of the form `<agent_type>-<8 hex chars>`.
    pub fn generate(agent_type: &str) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", agent_type, &uuid[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of an agent.
///
/// Legal edges: `Stopped -> Running`, `Running <-> Paused`,
/// `Running | Paused -> Stopped`, and any non-error state `-> Error`.
/// `Error` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Stopped,
    Running,
    Paused,
    Error,
}

impl AgentStatus {
    pub fn can_transition_to(self, to: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, to),
            (Stopped, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (Stopped, Error)
                | (Running, Error)
                | (Paused, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == AgentStatus::Error
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Stopped => write!(f, "stopped"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Paused => write!(f, "paused"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// Declarative description of what an agent handles.
///
/// Capabilities are metadata only; they never filter which messages reach
/// `process_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapability {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub input_types: BTreeSet<String>,
    #[serde(default)]
    pub output_types: BTreeSet<String>,
}

impl AgentCapability {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_types: BTreeSet::new(),
            output_types: BTreeSet::new(),
        }
    }

    pub fn with_inputs<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_outputs<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn accepts(&self, message_type: &str) -> bool {
        self.input_types.contains(message_type)
    }
}

/// Liveness and capability record for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<AgentCapability>,
    pub status: AgentStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub processed_messages: u64,
    pub error_count: u64,
}

impl AgentMetadata {
    pub fn new(
        agent_id: AgentId,
        agent_type: &str,
        version: &str,
        capabilities: Vec<AgentCapability>,
    ) -> Self {
        Self {
            agent_id,
            agent_type: agent_type.to_string(),
            version: version.to_string(),
            capabilities,
            status: AgentStatus::Stopped,
            started_at: None,
            last_heartbeat: None,
            processed_messages: 0,
            error_count: 0,
        }
    }

    /// Move to `to` along a legal edge.
    ///
    /// Entering `Running` from `Stopped` stamps `started_at`.
    pub fn transition(&mut self, to: AgentStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        if self.status == AgentStatus::Stopped && to == AgentStatus::Running {
            self.started_at = Some(Utc::now());
        }
        self.status = to;
        Ok(())
    }

    /// Declares a handler for `message_type` in any capability.
    pub fn handles(&self, message_type: &str) -> bool {
        self.capabilities.iter().any(|c| c.accepts(message_type))
    }
}
