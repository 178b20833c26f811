//! Error types for the agent supervisor and workload runtime.

use fleet_core::ErrorKind;
use fleetgrid_descriptor::DescriptorError;
use fleetgrid_state::RegistryError;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Failures talking to the external workload runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {output}")]
    Apply {
        program: String,
        status: String,
        output: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no agent process for entity {0}")]
    NotFound(String),

    #[error("agent process for entity {0} was not reaped after kill")]
    Timeout(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::NotFound(_) => ErrorKind::NotFound,
            SupervisorError::Timeout(_) => ErrorKind::Timeout,
            SupervisorError::Registry(e) => e.kind(),
            SupervisorError::Descriptor(e) => e.kind(),
            SupervisorError::Runtime(_) | SupervisorError::Io(_) => ErrorKind::ExternalFailure,
        }
    }
}
