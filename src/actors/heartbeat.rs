//! Heartbeat actor publishing agent liveness to the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::ActorHandle;
use crate::agent::AgentMetadata;
use crate::error::{Error, Result};
use crate::protocol::{channels, AgentMessage, ControlPayload, Heartbeat, MessageType};
use crate::transport::Connection;

/// Actor that periodically publishes `{agent_id, timestamp, metadata}` on
/// `orchestrator.heartbeat`.
pub struct HeartbeatActor {
    connection: Arc<dyn Connection>,
    metadata: Arc<RwLock<AgentMetadata>>,
    interval: Duration,
}

impl HeartbeatActor {
    pub fn new(
        connection: Arc<dyn Connection>,
        metadata: Arc<RwLock<AgentMetadata>>,
        interval: Duration,
    ) -> Self {
        Self {
            connection,
            metadata,
            interval,
        }
    }

    pub fn spawn(self) -> ActorHandle {
        ActorHandle::spawn("heartbeat", move |cancel| async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("HeartbeatActor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.beat().await {
                            Ok(()) => {}
                            Err(Error::ConnectionClosed) => {
                                debug!("HeartbeatActor: connection closed");
                                break;
                            }
                            Err(e) => warn!(error = %e, "heartbeat publish failed"),
                        }
                    }
                }
            }
        })
    }

    async fn beat(&self) -> Result<()> {
        let heartbeat = {
            let mut metadata = self.metadata.write();
            let now = Utc::now();
            metadata.last_heartbeat = Some(now);
            Heartbeat {
                agent_id: metadata.agent_id.clone(),
                timestamp: now,
                metadata: metadata.clone(),
            }
        };
        trace!(agent_id = %heartbeat.agent_id, "heartbeat");
        let message = AgentMessage::new(
            heartbeat.agent_id.clone(),
            MessageType::Heartbeat,
            heartbeat.to_payload()?,
        );
        self.connection
            .publish(channels::HEARTBEAT, message.encode()?)
            .await
    }
}
