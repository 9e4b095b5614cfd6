//! Message and response value types and their JSON wire encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::AgentId;
use crate::error::Result;

/// Opaque structured message body.
pub type Payload = serde_json::Map<String, Value>;

/// Discriminator for [`AgentMessage`].
///
/// The control types the orchestrator understands are variants; business
/// message types travel as `Other`. Serialized as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Register,
    Deregister,
    Heartbeat,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Register => "register",
            MessageType::Deregister => "deregister",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Other(name) => name,
        }
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "register" => MessageType::Register,
            "deregister" => MessageType::Deregister,
            "heartbeat" => MessageType::Heartbeat,
            _ => MessageType::Other(s),
        }
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        MessageType::from(s.to_string())
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message exchanged between agents.
///
/// Fields are read-only after construction; the builder methods consume
/// the message before it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    message_id: String,
    sender_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient_id: Option<AgentId>,
    message_type: MessageType,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// Create a broadcast message with a fresh id and the current time.
    pub fn new(sender_id: AgentId, message_type: impl Into<MessageType>, payload: Payload) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            sender_id,
            recipient_id: None,
            message_type: message_type.into(),
            payload,
            priority: 0,
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Address the message to a single agent.
    pub fn to(mut self, recipient_id: AgentId) -> Self {
        self.recipient_id = Some(recipient_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn sender_id(&self) -> &AgentId {
        &self.sender_id
    }

    pub fn recipient_id(&self) -> Option<&AgentId> {
        self.recipient_id.as_ref()
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_none()
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Outcome of processing one [`AgentMessage`].
///
/// `result` is present iff `success`; `error` is present iff not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    success: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl AgentResponse {
    pub fn success(result: Value, processing_time_ms: u64, correlation_id: Option<String>) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            processing_time_ms,
            correlation_id,
        }
    }

    pub fn failure(
        error: impl Into<String>,
        processing_time_ms: u64,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            processing_time_ms,
            correlation_id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn processing_time_ms(&self) -> u64 {
        self.processing_time_ms
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn into_result(self) -> Option<Value> {
        self.result
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A `result` key that is present always decodes to `Some`, so a handler
/// returning JSON `null` stays distinguishable from a failure.
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
