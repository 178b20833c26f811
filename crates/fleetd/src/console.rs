//! Operator console — one command per stdin line, JSON out.
//!
//! Lines are parsed with clap, so `help` and `<command> --help` work as on
//! the command line.

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use fleet_core::config::RolloutConfig;
use fleetgrid_agent::AgentSupervisor;
use fleetgrid_rollout::{RolloutPlan, UpdateOptions, UpdateOrchestrator};
use fleetgrid_state::{EntityId, EntitySpec, FleetRegistry};

#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
struct Line {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
enum ConsoleCommand {
    /// List entities.
    List {
        #[arg(long)]
        region: Option<String>,
    },
    /// Show one entity.
    Show { id: String },
    /// Fleet-wide counts.
    Stats,
    /// Register an entity.
    Create {
        region: String,
        version: String,
        #[arg(long)]
        id: Option<String>,
    },
    Delete { id: String },
    /// Set the operating mode (parked, driving).
    Mode { id: String, mode: String },
    /// Set the status (running, stopped, updating, failed).
    Status { id: String, status: String },
    /// Launch the entity's agent.
    Spawn { id: String },
    /// Stop the entity's agent.
    Stop { id: String },
    /// List running agents.
    Agents,
    /// Show one agent.
    Agent { id: String },
    /// Update one entity.
    Update {
        id: String,
        version: String,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Update several entities concurrently.
    Bulk {
        version: String,
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Staged rollout across regions, in the order given.
    Rollout {
        version: String,
        #[arg(long, value_delimiter = ',', required = true)]
        phases: Vec<String>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        wait_ms: Option<u64>,
        #[arg(long)]
        image: Option<String>,
    },
    /// Roll one entity back to `version`.
    Rollback { id: String, version: String },
    /// Feed a broker status/result message.
    Message {
        topic: String,
        #[arg(trailing_var_arg = true, required = true)]
        payload: Vec<String>,
    },
}

pub struct Console {
    registry: FleetRegistry,
    supervisor: AgentSupervisor,
    orchestrator: UpdateOrchestrator,
    rollout: RolloutConfig,
}

impl Console {
    pub fn new(
        registry: FleetRegistry,
        supervisor: AgentSupervisor,
        orchestrator: UpdateOrchestrator,
        rollout: RolloutConfig,
    ) -> Self {
        Self {
            registry,
            supervisor,
            orchestrator,
            rollout,
        }
    }

    /// Run one console line. Blank lines produce no output.
    pub async fn execute(&self, line: &str) -> Option<String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return None;
        }
        let parsed = match Line::try_parse_from(words) {
            Ok(parsed) => parsed,
            Err(e) => return Some(e.render().to_string().trim_end().to_string()),
        };
        let output = match self.run(parsed.command).await {
            Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|e| e.to_string()),
            Err(e) => format!("error: {e}"),
        };
        Some(output)
    }

    async fn run(&self, command: ConsoleCommand) -> anyhow::Result<Value> {
        let value = match command {
            ConsoleCommand::List { region } => {
                let entities = match region {
                    Some(region) => self.registry.list_by_region(&region),
                    None => self.registry.list(),
                };
                serde_json::to_value(entities)?
            }
            ConsoleCommand::Show { id } => serde_json::to_value(self.registry.get(&id)?)?,
            ConsoleCommand::Stats => serde_json::to_value(self.registry.stats())?,
            ConsoleCommand::Create {
                region,
                version,
                id,
            } => {
                let mut spec = EntitySpec::new(&region, &version);
                spec.id = id;
                serde_json::to_value(self.registry.create(spec)?)?
            }
            ConsoleCommand::Delete { id } => {
                if self.supervisor.is_running(&id).await {
                    self.supervisor.stop(&id).await?;
                }
                self.registry.delete(&id)?;
                json!({ "deleted": id })
            }
            ConsoleCommand::Mode { id, mode } => {
                serde_json::to_value(self.registry.set_mode_named(&id, &mode)?)?
            }
            ConsoleCommand::Status { id, status } => {
                serde_json::to_value(self.registry.set_status_named(&id, &status)?)?
            }
            ConsoleCommand::Spawn { id } => serde_json::to_value(self.supervisor.spawn(&id).await?)?,
            ConsoleCommand::Stop { id } => {
                let outcome = self.supervisor.stop(&id).await?;
                json!({ "stopped": id, "outcome": outcome })
            }
            ConsoleCommand::Agents => serde_json::to_value(self.supervisor.list().await)?,
            ConsoleCommand::Agent { id } => serde_json::to_value(self.supervisor.status(&id).await?)?,
            ConsoleCommand::Update {
                id,
                version,
                image,
                force,
            } => {
                let opts = UpdateOptions { image, force };
                serde_json::to_value(self.orchestrator.update(&id, &version, &opts).await?)?
            }
            ConsoleCommand::Bulk {
                version,
                ids,
                image,
                force,
            } => {
                let opts = UpdateOptions { image, force };
                serde_json::to_value(self.orchestrator.bulk_update(&ids, &version, &opts).await?)?
            }
            ConsoleCommand::Rollout {
                version,
                phases,
                threshold,
                wait_ms,
                image,
            } => {
                let phases: Vec<&str> = phases.iter().map(String::as_str).collect();
                let mut plan = RolloutPlan::new(&phases, &version, &self.rollout);
                if let Some(threshold) = threshold {
                    plan = plan.with_threshold(threshold);
                }
                if let Some(wait_ms) = wait_ms {
                    plan = plan.with_wait(Duration::from_millis(wait_ms));
                }
                if let Some(image) = image {
                    plan = plan.with_image(&image);
                }
                let universe: Vec<EntityId> =
                    self.registry.list().into_iter().map(|e| e.id).collect();
                serde_json::to_value(self.orchestrator.staged_rollout(&plan, &universe).await?)?
            }
            ConsoleCommand::Rollback { id, version } => {
                serde_json::to_value(self.orchestrator.rollback(&id, &version).await?)?
            }
            ConsoleCommand::Message { topic, payload } => {
                let payload = payload.join(" ");
                serde_json::to_value(
                    self.orchestrator
                        .handle_broker_message(&topic, payload.as_bytes())?,
                )?
            }
        };
        Ok(value)
    }
}
