//! Error types for the fleet registry.

use fleet_core::{ErrorKind, ParseVariantError};
use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("workload {workload} not found on entity {entity}")]
    WorkloadNotFound { entity: String, workload: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NotFound(_) | RegistryError::WorkloadNotFound { .. } => {
                ErrorKind::NotFound
            }
            RegistryError::Conflict(_) => ErrorKind::Conflict,
            RegistryError::Precondition(_) => ErrorKind::Precondition,
        }
    }
}

impl From<ParseVariantError> for RegistryError {
    fn from(e: ParseVariantError) -> Self {
        RegistryError::Precondition(e.to_string())
    }
}
