//! Agent-local messaging facade.
//!
//! The `MessageBus` wraps one [`Connection`] and provides point-to-point
//! send, broadcast, and request/response. Requests are correlated through a
//! pending table of oneshot senders keyed by correlation id; the response
//! listener resolves and removes the entry, so the first response wins and
//! late or duplicate deliveries are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::actors::ActorHandle;
use crate::agent::AgentId;
use crate::error::Result;
use crate::protocol::{channels, AgentMessage, AgentResponse, MessageType, Payload};
use crate::transport::Connection;

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<AgentResponse>>>>;

#[derive(Clone)]
pub struct MessageBus {
    agent_id: AgentId,
    connection: Arc<dyn Connection>,
    pending: PendingTable,
}

impl MessageBus {
    pub fn new(agent_id: AgentId, connection: Arc<dyn Connection>) -> Self {
        Self {
            agent_id,
            connection,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fire-and-forget publish to the recipient's channel, or to
    /// `broadcast.all` when the message has no recipient.
    pub async fn send_message(&self, message: &AgentMessage) -> Result<()> {
        let channel = channels::for_message(message);
        trace!(%channel, message_id = message.message_id(), "send");
        self.connection.publish(&channel, message.encode()?).await
    }

    /// Build and send a point-to-point message from this agent.
    pub async fn send_to(
        &self,
        recipient: &AgentId,
        message_type: impl Into<MessageType>,
        payload: Payload,
    ) -> Result<()> {
        let message =
            AgentMessage::new(self.agent_id.clone(), message_type, payload).to(recipient.clone());
        self.send_message(&message).await
    }

    /// Broadcast to every agent, or to every agent of `agent_type`.
    pub async fn broadcast(
        &self,
        message_type: impl Into<MessageType>,
        payload: Payload,
        agent_type: Option<&str>,
    ) -> Result<()> {
        let message = AgentMessage::new(self.agent_id.clone(), message_type, payload);
        let channel = match agent_type {
            Some(agent_type) => channels::broadcast(agent_type),
            None => channels::BROADCAST_ALL.to_string(),
        };
        self.connection.publish(&channel, message.encode()?).await
    }

    /// Send a request and wait up to `timeout` for its response.
    ///
    /// Returns `None` on timeout or if the request could not be published;
    /// the pending entry is removed either way.
    pub async fn send_request(
        &self,
        recipient: &AgentId,
        message_type: impl Into<MessageType>,
        payload: Payload,
        timeout: Duration,
    ) -> Option<AgentResponse> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id.clone(), tx);

        let message = AgentMessage::new(self.agent_id.clone(), message_type, payload)
            .to(recipient.clone())
            .with_correlation_id(correlation_id.clone());

        if let Err(e) = self.send_message(&message).await {
            warn!(%recipient, %correlation_id, error = %e, "request publish failed");
            self.pending.lock().remove(&correlation_id);
            return None;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => {
                debug!(%correlation_id, "pending request dropped");
                None
            }
            Err(_) => {
                self.pending.lock().remove(&correlation_id);
                debug!(%recipient, %correlation_id, ?timeout, "request timed out");
                None
            }
        }
    }

    /// Resolve the pending request matching the response's correlation id.
    ///
    /// Returns `false` when there is no such request (late, duplicate, or
    /// uncorrelated response).
    pub fn resolve(&self, response: AgentResponse) -> bool {
        let Some(correlation_id) = response.correlation_id().map(str::to_string) else {
            warn!(agent_id = %self.agent_id, "response without correlation id dropped");
            return false;
        };
        let sender = self.pending.lock().remove(&correlation_id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                debug!(%correlation_id, "no pending request, response dropped");
                false
            }
        }
    }

    /// Publish `response` to the requester's response channel.
    pub async fn reply(&self, request: &AgentMessage, response: &AgentResponse) -> Result<()> {
        let channel = channels::response(request.sender_id());
        self.connection.publish(&channel, response.encode()?).await
    }

    /// Start one long-lived listener over `channels`.
    ///
    /// Each payload is decoded into an [`AgentMessage`] and awaited through
    /// `handler` in arrival order. Payloads that fail to decode are logged
    /// and skipped.
    pub async fn subscribe<F, Fut>(&self, channels: &[String], mut handler: F) -> Result<ActorHandle>
    where
        F: FnMut(AgentMessage) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.connection.subscribe(channels).await?;
        let agent_id = self.agent_id.clone();
        Ok(ActorHandle::spawn("listener", move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    envelope = subscription.next() => {
                        let Some(envelope) = envelope else {
                            debug!(%agent_id, "subscription ended");
                            break;
                        };
                        match AgentMessage::decode(&envelope.payload) {
                            Ok(message) => handler(message).await,
                            Err(e) => warn!(
                                %agent_id,
                                channel = %envelope.channel,
                                error = %e,
                                "dropping malformed message"
                            ),
                        }
                    }
                }
            }
        }))
    }

    /// Start the listener on `response.<agent_id>` that resolves pending
    /// requests.
    pub async fn listen_for_responses(&self) -> Result<ActorHandle> {
        let mut subscription = self
            .connection
            .subscribe(&[channels::response(&self.agent_id)])
            .await?;
        let bus = self.clone();
        Ok(ActorHandle::spawn("response-listener", move |cancel| async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    envelope = subscription.next() => {
                        let Some(envelope) = envelope else { break };
                        match AgentResponse::decode(&envelope.payload) {
                            Ok(response) => {
                                bus.resolve(response);
                            }
                            Err(e) => warn!(
                                agent_id = %bus.agent_id,
                                error = %e,
                                "dropping malformed response"
                            ),
                        }
                    }
                }
            }
        }))
    }
}
