//! Stale-agent detection.
//!
//! The `HealthMonitor` sweeps the registry on a fixed interval and evicts
//! agents that have not sent a registration or heartbeat within the
//! configured silence window. Eviction is opt-in: the orchestrator only
//! spawns a monitor when `stale_after_ms` is set.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::RegistryStore;
use crate::actors::ActorHandle;
use crate::agent::AgentId;
use crate::config::DEFAULT_HEALTH_CHECK_INTERVAL_MS;

/// Configuration for stale-agent detection.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Silence after which an agent is considered gone.
    pub stale_after: Duration,
    /// Interval between registry sweeps.
    pub check_interval: Duration,
}

impl HealthConfig {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
        }
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }
}

/// Events emitted by the health monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    /// An agent went silent and was removed from the registry.
    AgentStale {
        agent_id: AgentId,
        silent_for: Duration,
    },
}

pub struct HealthMonitor {
    config: HealthConfig,
    registry: Arc<RwLock<RegistryStore>>,
    event_tx: Option<mpsc::UnboundedSender<HealthEvent>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, registry: Arc<RwLock<RegistryStore>>) -> Self {
        Self {
            config,
            registry,
            event_tx: None,
        }
    }

    /// Also report every eviction on `event_tx`.
    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<HealthEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Evict every stale agent and return what was evicted.
    pub fn check_all(&self) -> Vec<HealthEvent> {
        let evicted = self
            .registry
            .write()
            .evict_stale(Instant::now(), self.config.stale_after);

        let mut events = Vec::with_capacity(evicted.len());
        for (agent_id, silent_for) in evicted {
            info!(%agent_id, ?silent_for, "evicted stale agent");
            let event = HealthEvent::AgentStale {
                agent_id,
                silent_for,
            };
            if let Some(tx) = &self.event_tx {
                let _ = tx.send(event.clone());
            }
            events.push(event);
        }
        events
    }

    pub fn spawn(self) -> ActorHandle {
        ActorHandle::spawn("health-monitor", move |cancel| async move {
            let mut interval = tokio::time::interval(self.config.check_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("HealthMonitor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        self.check_all();
                    }
                }
            }
        })
    }
}
