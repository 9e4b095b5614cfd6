//! Agent runtime: lifecycle, self-registration, heartbeat and the inbound
//! listener that dispatches to [`Agent::process_message`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{AgentCapability, AgentId, AgentMetadata, AgentStatus, DEFAULT_AGENT_VERSION};
use crate::actors::{self, ActorHandle, HeartbeatActor};
use crate::bus::MessageBus;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    channels, AgentMessage, AgentResponse, ControlPayload, Deregistration, MessageType, Payload,
    Registration,
};
use crate::transport::{Connection, Transport};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Business logic plugged into an [`AgentRuntime`].
///
/// Every inbound message reaches `process_message` regardless of the
/// declared capabilities. Returning `Err` (or panicking) produces a failed
/// [`AgentResponse`]; the listener keeps running.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    fn agent_type(&self) -> &str;

    fn version(&self) -> &str {
        DEFAULT_AGENT_VERSION
    }

    fn capabilities(&self) -> Vec<AgentCapability>;

    async fn process_message(&self, message: &AgentMessage) -> HandlerResult;
}

/// Hosts one [`Agent`] on a transport.
///
/// `start()` connects, subscribes to `agent.<id>`, `broadcast.all` and
/// `broadcast.<type>`, registers with the orchestrator and starts the
/// heartbeat. `stop()` cancels and joins those tasks, then deregisters and
/// closes the connection, in that order.
pub struct AgentRuntime {
    agent: Arc<dyn Agent>,
    metadata: Arc<RwLock<AgentMetadata>>,
    transport: Arc<dyn Transport>,
    config: AgentConfig,
    connection: Option<Arc<dyn Connection>>,
    bus: Option<MessageBus>,
    tasks: Vec<ActorHandle>,
}

impl AgentRuntime {
    /// Create a runtime with a generated `<type>-<suffix>` id.
    pub fn new(agent: impl Agent, transport: Arc<dyn Transport>, config: AgentConfig) -> Self {
        let id = AgentId::generate(agent.agent_type());
        Self::with_id(id, agent, transport, config)
    }

    pub fn with_id(
        agent_id: AgentId,
        agent: impl Agent,
        transport: Arc<dyn Transport>,
        config: AgentConfig,
    ) -> Self {
        let agent: Arc<dyn Agent> = Arc::new(agent);
        let metadata = AgentMetadata::new(
            agent_id,
            agent.agent_type(),
            agent.version(),
            agent.capabilities(),
        );
        Self {
            agent,
            metadata: Arc::new(RwLock::new(metadata)),
            transport,
            config,
            connection: None,
            bus: None,
            tasks: Vec::new(),
        }
    }

    pub fn agent_id(&self) -> AgentId {
        self.metadata.read().agent_id.clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.metadata.read().status
    }

    /// Snapshot of the authoritative metadata.
    pub fn metadata(&self) -> AgentMetadata {
        self.metadata.read().clone()
    }

    /// Messaging facade, available while started.
    pub fn bus(&self) -> Option<&MessageBus> {
        self.bus.as_ref()
    }

    pub async fn start(&mut self) -> Result<()> {
        match self.status() {
            AgentStatus::Stopped => {}
            AgentStatus::Running | AgentStatus::Paused => {
                debug!(agent_id = %self.agent_id(), "start: already started");
                return Ok(());
            }
            AgentStatus::Error => {
                return Err(Error::InvalidTransition {
                    from: AgentStatus::Error,
                    to: AgentStatus::Running,
                })
            }
        }

        self.config.validate()?;
        let connection = match self.transport.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        if let Err(e) = self.bring_up(connection.clone()).await {
            actors::shutdown_all(std::mem::take(&mut self.tasks)).await;
            connection.close().await;
            self.bus = None;
            self.fail(&e);
            return Err(e);
        }

        self.connection = Some(connection);
        info!(agent_id = %self.agent_id(), agent_type = self.agent.agent_type(), "agent started");
        Ok(())
    }

    async fn bring_up(&mut self, connection: Arc<dyn Connection>) -> Result<()> {
        let (agent_id, agent_type) = {
            let mut metadata = self.metadata.write();
            metadata.transition(AgentStatus::Running)?;
            (metadata.agent_id.clone(), metadata.agent_type.clone())
        };

        let bus = MessageBus::new(agent_id.clone(), connection.clone());
        self.tasks.push(bus.listen_for_responses().await?);

        let agent = self.agent.clone();
        let metadata = self.metadata.clone();
        let replier = bus.clone();
        let listener = bus
            .subscribe(&channels::inbound(&agent_id, &agent_type), move |message| {
                let agent = agent.clone();
                let metadata = metadata.clone();
                let replier = replier.clone();
                async move { handle_inbound(agent.as_ref(), &metadata, &replier, message).await }
            })
            .await?;
        self.tasks.push(listener);

        let registration = Registration {
            metadata: self.metadata(),
        };
        let message = AgentMessage::new(agent_id, MessageType::Register, registration.to_payload()?);
        connection.publish(channels::REGISTER, message.encode()?).await?;

        self.tasks.push(
            HeartbeatActor::new(
                connection,
                self.metadata.clone(),
                self.config.heartbeat_interval(),
            )
            .spawn(),
        );
        self.bus = Some(bus);
        Ok(())
    }

    fn fail(&self, cause: &Error) {
        let mut metadata = self.metadata.write();
        if metadata.transition(AgentStatus::Error).is_err() {
            metadata.status = AgentStatus::Error;
        }
        metadata.error_count += 1;
        error!(agent_id = %metadata.agent_id, error = %cause, "agent failed to start");
    }

    /// Stop the agent. A no-op on an already stopped agent.
    pub async fn stop(&mut self) -> Result<()> {
        let status = self.status();
        if status == AgentStatus::Stopped {
            debug!(agent_id = %self.agent_id(), "stop: already stopped");
            return Ok(());
        }

        actors::shutdown_all(std::mem::take(&mut self.tasks)).await;

        if let Some(connection) = self.connection.take() {
            let agent_id = self.agent_id();
            let published = match deregistration(&agent_id) {
                Ok(wire) => connection.publish(channels::DEREGISTER, wire).await,
                Err(e) => Err(e),
            };
            if let Err(e) = published {
                warn!(%agent_id, error = %e, "deregistration publish failed");
            }
            connection.close().await;
        }
        self.bus = None;

        if status != AgentStatus::Error {
            self.metadata.write().transition(AgentStatus::Stopped)?;
        }
        info!(agent_id = %self.agent_id(), "agent stopped");
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.metadata.write().transition(AgentStatus::Paused)?;
        info!(agent_id = %self.agent_id(), "agent paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut metadata = self.metadata.write();
        if metadata.status != AgentStatus::Paused {
            return Err(Error::InvalidTransition {
                from: metadata.status,
                to: AgentStatus::Running,
            });
        }
        metadata.transition(AgentStatus::Running)?;
        info!(agent_id = %metadata.agent_id, "agent resumed");
        Ok(())
    }

    /// Request/response from this agent using the configured
    /// `request_timeout`. `Ok(None)` on timeout.
    pub async fn request(
        &self,
        recipient: &AgentId,
        message_type: impl Into<MessageType>,
        payload: Payload,
    ) -> Result<Option<AgentResponse>> {
        let bus = self.bus.as_ref().ok_or(Error::NotRunning)?;
        Ok(bus
            .send_request(recipient, message_type, payload, self.config.request_timeout())
            .await)
    }

    /// Run one message through the agent, exactly as the listener does,
    /// without replying.
    pub async fn process(&self, message: &AgentMessage) -> AgentResponse {
        process(self.agent.as_ref(), &self.metadata, message).await
    }
}

fn deregistration(agent_id: &AgentId) -> Result<String> {
    let body = Deregistration {
        agent_id: agent_id.clone(),
    };
    AgentMessage::new(agent_id.clone(), MessageType::Deregister, body.to_payload()?).encode()
}

async fn handle_inbound(
    agent: &dyn Agent,
    metadata: &RwLock<AgentMetadata>,
    bus: &MessageBus,
    message: AgentMessage,
) {
    let response = process(agent, metadata, &message).await;
    if message.correlation_id().is_none() {
        return;
    }
    if let Err(e) = bus.reply(&message, &response).await {
        warn!(
            agent_id = %bus.agent_id(),
            correlation_id = message.correlation_id(),
            error = %e,
            "reply publish failed"
        );
    }
}

async fn process(
    agent: &dyn Agent,
    metadata: &RwLock<AgentMetadata>,
    message: &AgentMessage,
) -> AgentResponse {
    let started = Instant::now();
    let correlation_id = message.correlation_id().map(str::to_string);

    let (agent_id, status) = {
        let metadata = metadata.read();
        (metadata.agent_id.clone(), metadata.status)
    };
    if status == AgentStatus::Paused {
        debug!(%agent_id, message_type = %message.message_type(), "rejecting message while paused");
        return AgentResponse::failure(
            format!("agent {} is paused", agent_id),
            elapsed_ms(started),
            correlation_id,
        );
    }

    let outcome = AssertUnwindSafe(agent.process_message(message))
        .catch_unwind()
        .await;
    let elapsed = elapsed_ms(started);

    let failure = match outcome {
        Ok(Ok(result)) => {
            metadata.write().processed_messages += 1;
            debug!(%agent_id, message_type = %message.message_type(), elapsed_ms = elapsed, "message processed");
            return AgentResponse::success(result, elapsed, correlation_id);
        }
        Ok(Err(e)) => e.to_string(),
        Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
    };

    {
        let mut metadata = metadata.write();
        metadata.processed_messages += 1;
        metadata.error_count += 1;
    }
    warn!(%agent_id, message_type = %message.message_type(), error = %failure, "handler error");
    AgentResponse::failure(failure, elapsed, correlation_id)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
