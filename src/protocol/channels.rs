//! Channel naming scheme.

use crate::agent::AgentId;
use crate::protocol::AgentMessage;

pub const REGISTER: &str = "orchestrator.register";
pub const DEREGISTER: &str = "orchestrator.deregister";
pub const HEARTBEAT: &str = "orchestrator.heartbeat";
pub const BROADCAST_ALL: &str = "broadcast.all";

/// Point-to-point channel of one agent.
pub fn agent(id: &AgentId) -> String {
    format!("agent.{}", id)
}

/// Broadcast channel for every agent of one type.
pub fn broadcast(agent_type: &str) -> String {
    format!("broadcast.{}", agent_type)
}

/// Channel on which `id` receives replies to its requests.
pub fn response(id: &AgentId) -> String {
    format!("response.{}", id)
}

/// Destination of `message`: its recipient's channel, or `broadcast.all`.
pub fn for_message(message: &AgentMessage) -> String {
    match message.recipient_id() {
        Some(recipient) => agent(recipient),
        None => BROADCAST_ALL.to_string(),
    }
}

/// Channels an agent listens on for inbound work.
pub fn inbound(id: &AgentId, agent_type: &str) -> Vec<String> {
    vec![agent(id), BROADCAST_ALL.to_string(), broadcast(agent_type)]
}
