//! fleetd — the FleetGrid daemon.
//!
//! Single binary that assembles the FleetGrid services:
//! - Fleet registry + notification bus
//! - Agent supervisor (one `ank` process per entity)
//! - Update orchestrator (single, bulk, staged, rollback)
//! - Operator console on stdin
//!
//! # Usage
//!
//! ```text
//! fleetd standalone --config fleet.toml --seed 10
//! fleetd config --config fleet.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleet_core::FleetConfig;

mod console;
mod standalone;

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every service in one process, driven from the operator console.
    Standalone {
        /// Path to fleet.toml. Defaults apply when the file is absent.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Number of entities to create across the configured regions.
        #[arg(long, default_value = "0")]
        seed: usize,

        /// Launch an agent for every seeded entity.
        #[arg(long)]
        spawn_agents: bool,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fleetd=debug,fleetgrid=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            seed,
            spawn_agents,
        } => {
            let config = FleetConfig::load_or_default(&config)?;
            standalone::run_standalone(config, seed, spawn_agents).await
        }
        Command::Config { config } => {
            let config = FleetConfig::load_or_default(&config)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
