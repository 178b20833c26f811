//! WorkloadRuntime — the contract with the external workload runtime.
//!
//! The default `CliRuntime` drives the `ank` CLI for descriptors and the
//! container CLI (`podman`) for stale container cleanup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use fleet_core::config::AgentConfig;

use crate::error::{RuntimeError, RuntimeResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Operations the supervisor needs from the workload runtime.
pub trait WorkloadRuntime: Send + Sync {
    /// Command for the long-lived, supervised `apply` of `descriptor`.
    fn apply_command(&self, descriptor: &Path) -> Command;

    /// One-shot `apply` of `descriptor`, returning the runtime's output.
    fn apply<'a>(&'a self, descriptor: &'a Path) -> BoxFuture<'a, RuntimeResult<String>>;

    /// Stop and remove a container. A missing container is not an error.
    fn remove_container<'a>(&'a self, name: &'a str) -> BoxFuture<'a, RuntimeResult<()>>;
}

/// `WorkloadRuntime` backed by the runtime and container CLIs.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    runtime_path: PathBuf,
    container_cli: String,
}

impl CliRuntime {
    pub fn new(runtime_path: impl Into<PathBuf>, container_cli: &str) -> Self {
        Self {
            runtime_path: runtime_path.into(),
            container_cli: container_cli.to_string(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.runtime_path.clone(), &config.container_cli)
    }
}

impl WorkloadRuntime for CliRuntime {
    fn apply_command(&self, descriptor: &Path) -> Command {
        let mut cmd = Command::new(&self.runtime_path);
        cmd.arg("apply").arg(descriptor);
        cmd
    }

    fn apply<'a>(&'a self, descriptor: &'a Path) -> BoxFuture<'a, RuntimeResult<String>> {
        Box::pin(async move {
            let output = self
                .apply_command(descriptor)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|source| RuntimeError::Spawn {
                    program: self.runtime_path.display().to_string(),
                    source,
                })?;

            if !output.status.success() {
                return Err(RuntimeError::Apply {
                    program: self.runtime_path.display().to_string(),
                    status: output.status.to_string(),
                    output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }

    fn remove_container<'a>(&'a self, name: &'a str) -> BoxFuture<'a, RuntimeResult<()>> {
        Box::pin(async move {
            for verb in ["stop", "rm"] {
                let status = Command::new(&self.container_cli)
                    .arg(verb)
                    .arg(name)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map_err(|source| RuntimeError::Spawn {
                        program: self.container_cli.clone(),
                        source,
                    })?;
                debug!(container = %name, verb, %status, "container cleanup step");
            }
            Ok(())
        })
    }
}
