use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_ORCHESTRATOR_ID: &str = "orchestrator";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Settings shared by every agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub heartbeat_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl AgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        non_zero("agent.heartbeat_interval_ms", self.heartbeat_interval_ms)
    }
}

/// Settings for the coordinator process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub orchestrator_id: String,
    /// Evict agents whose last heartbeat is older than this. `None` never evicts.
    pub stale_after_ms: Option<u64>,
    pub health_check_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            orchestrator_id: DEFAULT_ORCHESTRATOR_ID.to_string(),
            stale_after_ms: None,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
        }
    }
}

impl OrchestratorConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_ms.map(Duration::from_millis)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        non_zero(
            "orchestrator.health_check_interval_ms",
            self.health_check_interval_ms,
        )
    }
}

fn non_zero(key: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(Error::Validation(format!("{} must be greater than zero", key)));
    }
    Ok(())
}

impl Config {
    pub fn warden_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".warden"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::warden_dir()?.join("warden.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            heartbeat_interval_ms = config.agent.heartbeat_interval_ms,
            request_timeout_ms = config.agent.request_timeout_ms,
            stale_after_ms = ?config.orchestrator.stale_after_ms,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.orchestrator.validate()
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::warden_dir()?;
        if !dir.exists() {
            debug!(dir = %dir.display(), "Creating warden directory");
            fs::create_dir_all(&dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }
}
