//! Wire protocol between agents and the orchestrator.
//!
//! Messages and responses are JSON documents published on named channels
//! (see [`channels`]).

pub mod channels;
mod control;
mod message;

pub use control::{ControlPayload, Deregistration, Heartbeat, Registration};
pub use message::{AgentMessage, AgentResponse, MessageType, Payload};
