//! fleet.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Container image every simulated ECU runs unless an update overrides it.
pub const DEFAULT_IMAGE: &str =
    "ghcr.io/eclipse-sdv-hackathon-chapter-three/mission-update/update_trigger:latest";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub registry: RegistryConfig,
    pub agent: AgentConfig,
    pub rollout: RolloutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Entries kept in each entity's log ring.
    pub log_capacity: usize,
    /// Regions used when seeding a fleet.
    pub regions: Vec<String>,
    pub default_image: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            log_capacity: 100,
            regions: ["Munich", "Berlin", "Hamburg", "Cologne", "Frankfurt"]
                .iter()
                .map(|r| r.to_string())
                .collect(),
            default_image: DEFAULT_IMAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Path to the workload runtime CLI (`ank`).
    pub runtime_path: PathBuf,
    /// Container engine used for stale container cleanup.
    pub container_cli: String,
    /// Directory holding one descriptor file per running agent.
    pub descriptor_dir: PathBuf,
    pub port_base: u16,
    pub port_span: u16,
    pub port_attempts: u32,
    pub stop_grace_ms: u64,
    /// Captured output lines kept per agent.
    pub output_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            runtime_path: PathBuf::from("/usr/local/bin/ank"),
            container_cli: "podman".to_string(),
            descriptor_dir: PathBuf::from("./ankaios_states"),
            port_base: 9000,
            port_span: 1000,
            port_attempts: 10,
            stop_grace_ms: 5000,
            output_capacity: 50,
        }
    }
}

impl AgentConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Minimum per-phase success rate (0.0–1.0).
    pub success_threshold: f64,
    /// Pause between phases in milliseconds.
    pub wait_ms: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            success_threshold: 0.8,
            wait_ms: 300_000,
        }
    }
}

impl RolloutConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
