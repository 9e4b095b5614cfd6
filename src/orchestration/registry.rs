//! Agent registry owned by one orchestrator.
//!
//! The `RegistryStore` holds the orchestrator's own copy of every agent's
//! metadata, rebuilt from registration and heartbeat messages, plus a
//! per-type instance index in registration order. The index and the
//! metadata map are always updated together.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{AgentId, AgentMetadata, AgentStatus};
use crate::protocol::Heartbeat;

#[derive(Debug, Default)]
pub struct RegistryStore {
    /// Latest metadata per agent.
    agents: HashMap<AgentId, AgentMetadata>,
    /// Instances per agent type, in registration order.
    instances: HashMap<String, Vec<AgentId>>,
    /// Round-robin cursor per agent type.
    cursors: HashMap<String, usize>,
    /// When the registry last heard from each agent.
    last_seen: HashMap<AgentId, Instant>,
}

impl RegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent. Returns `true` if the agent was new.
    pub fn upsert(&mut self, metadata: AgentMetadata) -> bool {
        let agent_id = metadata.agent_id.clone();
        let agent_type = metadata.agent_type.clone();

        let previous_type = self
            .agents
            .get(&agent_id)
            .map(|existing| existing.agent_type.clone());
        if let Some(previous_type) = &previous_type {
            if *previous_type != agent_type {
                self.unindex(&agent_id, previous_type);
            }
        }

        let ids = self.instances.entry(agent_type.clone()).or_default();
        if !ids.contains(&agent_id) {
            ids.push(agent_id.clone());
        }
        self.last_seen.insert(agent_id.clone(), Instant::now());
        self.agents.insert(agent_id.clone(), metadata);

        let is_new = previous_type.is_none();
        if is_new {
            info!(%agent_id, %agent_type, "agent registered");
        } else {
            debug!(%agent_id, %agent_type, "agent metadata updated");
        }
        is_new
    }

    pub fn remove(&mut self, agent_id: &AgentId) -> Option<AgentMetadata> {
        let metadata = self.agents.remove(agent_id)?;
        self.unindex(agent_id, &metadata.agent_type);
        self.last_seen.remove(agent_id);
        info!(%agent_id, agent_type = %metadata.agent_type, "agent deregistered");
        Some(metadata)
    }

    fn unindex(&mut self, agent_id: &AgentId, agent_type: &str) {
        if let Some(ids) = self.instances.get_mut(agent_type) {
            ids.retain(|id| id != agent_id);
            if ids.is_empty() {
                self.instances.remove(agent_type);
                self.cursors.remove(agent_type);
            }
        }
    }

    /// Apply a heartbeat. The last heartbeat received wins, regardless of
    /// its timestamp. A heartbeat from an unknown agent registers it.
    pub fn record_heartbeat(&mut self, heartbeat: Heartbeat) {
        let mut metadata = heartbeat.metadata;
        metadata.last_heartbeat = Some(heartbeat.timestamp);
        if !self.agents.contains_key(&heartbeat.agent_id) {
            warn!(agent_id = %heartbeat.agent_id, "heartbeat from unregistered agent, registering");
        }
        self.upsert(metadata);
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<&AgentMetadata> {
        self.agents.get(agent_id)
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Owned copy of every registered agent.
    pub fn snapshot(&self) -> HashMap<AgentId, AgentMetadata> {
        self.agents.clone()
    }

    /// Agents of `agent_type` in registration order, any status.
    pub fn agents_by_type(&self, agent_type: &str) -> Vec<AgentMetadata> {
        self.instances
            .get(agent_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.agents.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pick the next `Running` instance of `agent_type`, round-robin.
    pub fn select_instance(&mut self, agent_type: &str) -> Option<AgentId> {
        let ids = self.instances.get(agent_type)?;
        let cursor = self.cursors.entry(agent_type.to_string()).or_insert(0);
        let count = ids.len();

        for offset in 0..count {
            let slot = (*cursor + offset) % count;
            let agent_id = &ids[slot];
            match self.agents.get(agent_id) {
                Some(metadata) if metadata.status == AgentStatus::Running => {
                    *cursor = (slot + 1) % count;
                    return Some(agent_id.clone());
                }
                Some(_) => {}
                None => warn!(%agent_id, agent_type, "indexed agent missing from registry, skipping"),
            }
        }
        debug!(agent_type, "no running instance");
        None
    }

    /// Agents not heard from within `max_silence` of `now`.
    pub fn stale_agents(&self, now: Instant, max_silence: Duration) -> Vec<(AgentId, Duration)> {
        let mut stale: Vec<(AgentId, Duration)> = self
            .last_seen
            .iter()
            .filter_map(|(id, seen)| {
                let silent_for = now.saturating_duration_since(*seen);
                (silent_for > max_silence).then(|| (id.clone(), silent_for))
            })
            .collect();
        stale.sort_by(|a, b| a.0.cmp(&b.0));
        stale
    }

    /// Remove every agent [`stale_agents`](Self::stale_agents) reports, in
    /// one pass under the caller's lock.
    pub fn evict_stale(&mut self, now: Instant, max_silence: Duration) -> Vec<(AgentId, Duration)> {
        self.stale_agents(now, max_silence)
            .into_iter()
            .filter(|(agent_id, _)| self.remove(agent_id).is_some())
            .collect()
    }
}
