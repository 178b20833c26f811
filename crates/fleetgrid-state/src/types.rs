//! Domain types for the fleet registry.
//!
//! These types represent entities (vehicles/agents), the workloads they
//! run, their bounded log ring and their append-only update history.
//! Everything handed out of the registry is an owned snapshot.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::{EntityStatus, LogLevel, OperatingMode, UpdateOutcome};

/// Unique identifier for an entity.
pub type EntityId = String;

// ── Entity ────────────────────────────────────────────────────────

/// A fleet member tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub region: String,
    pub mode: OperatingMode,
    pub status: EntityStatus,
    /// Current software version.
    pub version: String,
    /// Workloads in insertion order; names are unique.
    pub workloads: Vec<Workload>,
    pub metadata: EntityMetadata,
    /// Most recent log entries, oldest first.
    pub logs: VecDeque<LogEntry>,
    /// Append-only update history.
    pub update_history: Vec<UpdateRecord>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Identity the entity presents to the workload runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityMetadata {
    /// Runtime agent name.
    pub agent_name: String,
    /// Container image reference for the entity's workloads.
    pub image: String,
}

/// A deployable unit (simulated ECU) attached to an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub name: String,
    pub version: String,
    pub status: EntityStatus,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// One entry of an entity's update history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRecord {
    /// Set when only one workload's version changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: UpdateOutcome,
}

// ── Creation input ────────────────────────────────────────────────

/// Input to `FleetRegistry::create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntitySpec {
    /// Generated (uuid v4) when absent.
    #[serde(default)]
    pub id: Option<EntityId>,
    /// Defaults to `car_<first 8 id chars>`.
    #[serde(default)]
    pub name: Option<String>,
    pub region: String,
    #[serde(default)]
    pub mode: Option<OperatingMode>,
    pub version: String,
    /// Defaults to a single workload named `workload_<first 8 id chars>`.
    #[serde(default)]
    pub workloads: Option<Vec<WorkloadSpec>>,
    /// Defaults to the registry's configured image.
    #[serde(default)]
    pub image: Option<String>,
}

impl EntitySpec {
    pub fn new(region: &str, version: &str) -> Self {
        Self {
            region: region.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_workloads(mut self, workloads: Vec<WorkloadSpec>) -> Self {
        self.workloads = Some(workloads);
        self
    }
}

/// Input to `FleetRegistry::add_workload`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadSpec {
    pub name: String,
    /// Defaults to the owning entity's version.
    #[serde(default)]
    pub version: Option<String>,
}

impl WorkloadSpec {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Some(version.to_string()),
        }
    }
}

// ── Statistics ────────────────────────────────────────────────────

/// Fleet-wide counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FleetStats {
    pub total: usize,
    pub total_workloads: usize,
    pub by_region: BTreeMap<String, usize>,
    pub by_mode: BTreeMap<OperatingMode, usize>,
    pub by_status: BTreeMap<EntityStatus, usize>,
    pub by_version: BTreeMap<String, usize>,
    /// Workload name → number of entities running it.
    pub workload_distribution: BTreeMap<String, usize>,
}

impl Entity {
    /// Look up a workload by name.
    pub fn workload(&self, name: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.name == name)
    }

    /// The last `n` update history records, oldest first.
    pub fn recent_history(&self, n: usize) -> &[UpdateRecord] {
        let start = self.update_history.len().saturating_sub(n);
        &self.update_history[start..]
    }

    /// Append a log entry, discarding the oldest ones past `capacity`.
    pub(crate) fn push_log(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        capacity: usize,
    ) -> LogEntry {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };
        self.logs.push_back(entry.clone());
        while self.logs.len() > capacity {
            self.logs.pop_front();
        }
        entry
    }

    pub(crate) fn push_history(
        &mut self,
        workload: Option<&str>,
        from: &str,
        to: &str,
        outcome: UpdateOutcome,
    ) {
        self.update_history.push(UpdateRecord {
            workload: workload.map(str::to_string),
            from: from.to_string(),
            to: to.to_string(),
            timestamp: Utc::now(),
            outcome,
        });
    }

    pub(crate) fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}
