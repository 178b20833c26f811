//! Standalone mode — every service in one process.
//!
//! 1. Builds the notification bus and registry from `[registry]`
//! 2. Builds the agent supervisor over the `ank` CLI from `[agent]`
//! 3. Wires the orchestrator to a supervisor-backed broker
//! 4. Optionally seeds a fleet and launches its agents
//! 5. Serves the operator console until stdin closes or Ctrl-C

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use fleet_core::FleetConfig;
use fleetgrid_agent::{AgentSupervisor, CliRuntime};
use fleetgrid_rollout::{SupervisorBroker, UpdateOrchestrator};
use fleetgrid_state::{EntityId, EntitySpec, EventBus, FleetRegistry, Notification, RegistryResult};

use crate::console::Console;

pub async fn run_standalone(
    config: FleetConfig,
    seed: usize,
    spawn_agents: bool,
) -> anyhow::Result<()> {
    info!("FleetGrid daemon starting in standalone mode");

    // ── Services ───────────────────────────────────────────────

    let bus = EventBus::default();
    let registry = FleetRegistry::with_config(&config.registry, Arc::new(bus.clone()));
    info!(log_capacity = config.registry.log_capacity, "registry initialized");

    let runtime = Arc::new(CliRuntime::from_config(&config.agent));
    let supervisor = AgentSupervisor::new(registry.clone(), runtime, &config.agent);
    info!(
        runtime = %config.agent.runtime_path.display(),
        descriptors = %config.agent.descriptor_dir.display(),
        "agent supervisor initialized"
    );

    let broker = Arc::new(SupervisorBroker::new(supervisor.clone()));
    let orchestrator = UpdateOrchestrator::new(registry.clone(), broker);

    // ── Event log ──────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let events_handle = tokio::spawn(log_events(bus.subscribe(), shutdown_rx));

    // ── Seed ───────────────────────────────────────────────────

    let seeded = seed_fleet(&registry, &config.registry.regions, seed)?;
    if spawn_agents {
        for id in &seeded {
            if let Err(e) = supervisor.spawn(id).await {
                warn!(entity = %id, error = %e, "failed to launch agent");
            }
        }
    }
    info!(entities = registry.len(), "fleet ready");

    // ── Console ────────────────────────────────────────────────

    let console = Console::new(
        registry.clone(),
        supervisor.clone(),
        orchestrator,
        config.rollout.clone(),
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(output) = console.execute(&line).await {
                        println!("{output}");
                    }
                }
                None => {
                    info!("console closed");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown signal received");
                break;
            }
        }
    }

    // ── Shutdown ───────────────────────────────────────────────

    let stopped = supervisor.stop_all().await;
    let _ = shutdown_tx.send(true);
    let _ = events_handle.await;

    info!(agents_stopped = stopped, "FleetGrid daemon stopped");
    Ok(())
}

/// Create `count` parked entities spread round-robin over `regions`.
pub fn seed_fleet(
    registry: &FleetRegistry,
    regions: &[String],
    count: usize,
) -> RegistryResult<Vec<EntityId>> {
    if regions.is_empty() {
        if count > 0 {
            warn!(count, "no regions configured, nothing seeded");
        }
        return Ok(Vec::new());
    }
    let mut ids = Vec::with_capacity(count);
    for region in regions.iter().cycle().take(count) {
        let entity = registry.create(EntitySpec::new(region, "1.0.0"))?;
        ids.push(entity.id);
    }
    if count > 0 {
        info!(count, regions = regions.len(), "fleet seeded");
    }
    Ok(ids)
}

async fn log_events(mut rx: broadcast::Receiver<Notification>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(notification) => {
                    debug!(event = notification.event.name(), "fleet event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}
