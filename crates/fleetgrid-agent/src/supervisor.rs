//! AgentSupervisor — maps each entity to at most one worker process.
//!
//! `spawn` cleans up anything left over from a previous agent with the same
//! identity, allocates ports, writes the entity's descriptor and launches
//! the runtime's `apply` as a supervised child. `stop` always removes the
//! handle and the descriptor file, whichever way the process ended.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use fleet_core::LogLevel;
use fleet_core::config::AgentConfig;
use fleetgrid_descriptor::{DescriptorBuilder, RuntimeDescriptor, remove_descriptor, write_descriptor};
use fleetgrid_state::{Entity, EntityId, FleetRegistry};

use crate::error::{RuntimeError, SupervisorError, SupervisorResult};
use crate::ports::PortAllocator;
use crate::process::{AgentProcessHandle, AgentSlot, OwnerContext, StopOutcome, Termination};
use crate::process::{stop_slot, supervise};
use crate::runtime::WorkloadRuntime;

/// Container name used by earlier agents for `entity_id`.
pub fn legacy_container_name(entity_id: &str) -> String {
    format!("car-{entity_id}")
}

/// Supervises per-entity agent processes.
#[derive(Clone)]
pub struct AgentSupervisor {
    registry: FleetRegistry,
    runtime: Arc<dyn WorkloadRuntime>,
    ports: Arc<PortAllocator>,
    descriptor_dir: PathBuf,
    stop_grace: Duration,
    output_capacity: usize,
    /// Active agents: entity_id → slot.
    agents: Arc<RwLock<HashMap<EntityId, AgentSlot>>>,
}

impl AgentSupervisor {
    pub fn new(
        registry: FleetRegistry,
        runtime: Arc<dyn WorkloadRuntime>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            registry,
            runtime,
            ports: Arc::new(PortAllocator::from_config(config)),
            descriptor_dir: config.descriptor_dir.clone(),
            stop_grace: config.stop_grace(),
            output_capacity: config.output_capacity,
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the stop grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Launch the agent process for `entity_id`.
    pub async fn spawn(&self, entity_id: &str) -> SupervisorResult<AgentProcessHandle> {
        let entity = self.registry.get(entity_id)?;

        self.cleanup_stale(entity_id).await;

        let block = u16::try_from(entity.workloads.len().max(1)).unwrap_or(u16::MAX);
        let base_port = self.ports.allocate(block);
        let descriptor = build_descriptor(&entity, &entity.version, None, base_port)?;
        let path = write_descriptor(&self.descriptor_dir, entity_id, &descriptor)?;

        let mut cmd = self.runtime.apply_command(&path);
        cmd.env("AGENT_ID", &entity.id)
            .env("AGENT_CITY", &entity.region)
            .env("AGENT_STATE", entity.mode.as_str())
            .env("AGENT_STATUS", entity.status.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                if let Err(e) = remove_descriptor(&path) {
                    warn!(entity = %entity_id, error = %e, "failed to remove descriptor");
                }
                let program = cmd.as_std().get_program().to_string_lossy().into_owned();
                error!(entity = %entity_id, %program, error = %source, "agent spawn failed");
                self.log(entity_id, &format!("Agent spawn failed: {source}"), LogLevel::Error);
                return Err(RuntimeError::Spawn { program, source }.into());
            }
        };

        let ctx = OwnerContext {
            registry: self.registry.clone(),
            output_capacity: self.output_capacity,
        };
        let slot = supervise(child, entity_id, path.clone(), base_port, ctx);
        let snapshot = slot.snapshot();

        let displaced = self.agents.write().await.insert(entity_id.to_string(), slot);
        if let Some(old) = displaced {
            // a concurrent spawn for the same entity won the race to insert first
            warn!(entity = %entity_id, "replacing agent started concurrently");
            stop_slot(old, self.stop_grace).await;
        }

        info!(
            entity = %entity_id,
            pid = ?snapshot.pid,
            port = base_port,
            descriptor = %path.display(),
            "agent spawned"
        );
        self.log(
            entity_id,
            &format!("Agent spawned on base port {base_port}"),
            LogLevel::Info,
        );
        Ok(snapshot)
    }

    /// Stop the agent process for `entity_id`.
    ///
    /// Sends SIGTERM, waits for the grace period, then SIGKILL. The handle
    /// and descriptor file are removed on every path.
    pub async fn stop(&self, entity_id: &str) -> SupervisorResult<StopOutcome> {
        let slot = self
            .agents
            .write()
            .await
            .remove(entity_id)
            .ok_or_else(|| SupervisorError::NotFound(entity_id.to_string()))?;
        let path = slot.snapshot().descriptor_path;

        let termination = stop_slot(slot, self.stop_grace).await;

        if let Err(e) = remove_descriptor(&path) {
            warn!(entity = %entity_id, path = %path.display(), error = %e, "failed to remove descriptor");
        }

        match termination {
            Termination::Stopped(outcome) => {
                info!(entity = %entity_id, ?outcome, "agent stopped");
                Ok(outcome)
            }
            Termination::Unreaped => {
                error!(entity = %entity_id, "agent not reaped after kill");
                Err(SupervisorError::Timeout(entity_id.to_string()))
            }
        }
    }

    /// Stop every agent. Returns how many stopped cleanly.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<EntityId> = self.agents.read().await.keys().cloned().collect();
        let mut stopped = 0;
        for id in ids {
            match self.stop(&id).await {
                Ok(_) => stopped += 1,
                Err(SupervisorError::NotFound(_)) => {}
                Err(e) => error!(entity = %id, error = %e, "failed to stop agent"),
            }
        }
        info!(stopped, "all agents stopped");
        stopped
    }

    /// Snapshot of one agent's handle.
    pub async fn status(&self, entity_id: &str) -> SupervisorResult<AgentProcessHandle> {
        self.agents
            .read()
            .await
            .get(entity_id)
            .map(AgentSlot::snapshot)
            .ok_or_else(|| SupervisorError::NotFound(entity_id.to_string()))
    }

    /// Snapshots of every agent, ordered by entity id.
    pub async fn list(&self) -> Vec<AgentProcessHandle> {
        let mut all: Vec<AgentProcessHandle> = self
            .agents
            .read()
            .await
            .values()
            .map(AgentSlot::snapshot)
            .collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        all
    }

    pub async fn is_running(&self, entity_id: &str) -> bool {
        self.agents.read().await.contains_key(entity_id)
    }

    /// Rewrite the descriptor for `version` and apply it once.
    ///
    /// Reuses the running agent's ports when there is one.
    pub async fn redeploy(
        &self,
        entity_id: &str,
        version: &str,
        image: Option<&str>,
    ) -> SupervisorResult<String> {
        let entity = self.registry.get(entity_id)?;
        let running_port = self
            .agents
            .read()
            .await
            .get(entity_id)
            .map(|slot| slot.snapshot().base_port);

        let base_port = match running_port {
            Some(port) => port,
            None => {
                let block = u16::try_from(entity.workloads.len().max(1)).unwrap_or(u16::MAX);
                self.ports.allocate(block)
            }
        };
        let descriptor = build_descriptor(&entity, version, image, base_port)?;
        let path = write_descriptor(&self.descriptor_dir, entity_id, &descriptor)?;

        let result = self.runtime.apply(&path).await;
        if running_port.is_none() {
            if let Err(e) = remove_descriptor(&path) {
                warn!(entity = %entity_id, error = %e, "failed to remove descriptor");
            }
        }
        let output = result?;
        debug!(entity = %entity_id, %version, output = %output.trim(), "descriptor applied");
        Ok(output)
    }

    /// Best-effort removal of anything a previous agent left behind.
    async fn cleanup_stale(&self, entity_id: &str) {
        let existing = self.agents.write().await.remove(entity_id);
        if let Some(slot) = existing {
            let path = slot.snapshot().descriptor_path;
            let termination = stop_slot(slot, self.stop_grace).await;
            debug!(entity = %entity_id, ?termination, "stopped previous agent");
            if let Err(e) = remove_descriptor(&path) {
                debug!(entity = %entity_id, error = %e, "stale descriptor not removed");
            }
        }

        let container = legacy_container_name(entity_id);
        match self.runtime.remove_container(&container).await {
            Ok(()) => debug!(entity = %entity_id, %container, "stale container cleaned up"),
            Err(e) => debug!(entity = %entity_id, %container, error = %e, "stale container cleanup skipped"),
        }
    }

    fn log(&self, entity_id: &str, message: &str, level: LogLevel) {
        if let Err(e) = self.registry.append_log(entity_id, message, level) {
            debug!(entity = %entity_id, error = %e, "supervisor log not recorded");
        }
    }
}

/// Descriptor for `entity` at `version`. Workloads keep their own versions
/// when `version` is the entity's current one; otherwise all move to it.
fn build_descriptor(
    entity: &Entity,
    version: &str,
    image: Option<&str>,
    base_port: u16,
) -> SupervisorResult<RuntimeDescriptor> {
    let image = image.unwrap_or(&entity.metadata.image);
    let mut builder = DescriptorBuilder::new(&entity.id, &entity.metadata.agent_name, image)
        .base_port(base_port)
        .env("CITY", &entity.region)
        .env("STATE", entity.mode.as_str());
    for workload in &entity.workloads {
        let workload_version = if version == entity.version {
            workload.version.as_str()
        } else {
            version
        };
        builder = builder.workload(&workload.name, workload_version);
    }
    Ok(builder.build()?)
}
