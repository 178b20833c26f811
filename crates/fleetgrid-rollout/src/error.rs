//! Error types for update orchestration and the deployment broker.

use fleet_core::ErrorKind;
use fleetgrid_state::RegistryError;
use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Failures reported by a deployment broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("deployment rejected: {0}")]
    Rejected(String),

    #[error("broker transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("phase {0} matches no entities")]
    EmptyPhase(String),

    #[error("update of {entity} failed: {source}")]
    External {
        entity: String,
        #[source]
        source: BrokerError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::InvalidRequest(_) | OrchestratorError::EmptyPhase(_) => {
                ErrorKind::InvalidRequest
            }
            OrchestratorError::External { .. } => ErrorKind::ExternalFailure,
            OrchestratorError::Registry(e) => e.kind(),
        }
    }
}
