//! Typed payloads for the orchestrator control channels.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{AgentId, AgentMetadata};
use crate::error::{Error, Result};
use crate::protocol::Payload;

/// Published on `orchestrator.register` when an agent starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub metadata: AgentMetadata,
}

/// Published on `orchestrator.deregister` when an agent stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deregistration {
    pub agent_id: AgentId,
}

/// Published on `orchestrator.heartbeat` at a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    pub metadata: AgentMetadata,
}

/// Conversion between a typed control body and a message [`Payload`].
pub trait ControlPayload: Serialize + DeserializeOwned {
    fn to_payload(&self) -> Result<Payload> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::Validation(format!(
                "control payload must be an object, got {}",
                other
            ))),
        }
    }

    fn from_payload(payload: &Payload) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(payload.clone()))?)
    }
}

impl ControlPayload for Registration {}
impl ControlPayload for Deregistration {}
impl ControlPayload for Heartbeat {}
