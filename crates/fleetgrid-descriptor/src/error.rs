//! Error types for descriptor construction and persistence.

use fleet_core::ErrorKind;
use thiserror::Error;

pub type DescriptorResult<T> = Result<T, DescriptorError>;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor for {0} has no workloads")]
    EmptyWorkloads(String),

    #[error("port {base} + {index} exceeds the valid port range")]
    PortOverflow { base: u16, index: usize },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DescriptorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DescriptorError::EmptyWorkloads(_) | DescriptorError::PortOverflow { .. } => {
                ErrorKind::Precondition
            }
            DescriptorError::Yaml(_) | DescriptorError::Io(_) => ErrorKind::ExternalFailure,
        }
    }
}
