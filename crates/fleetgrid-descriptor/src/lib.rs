//! fleetgrid-descriptor — runtime descriptors for supervised agents.
//!
//! A descriptor is the document handed to the workload runtime's `apply`
//! command: one entry per workload, each naming its target agent, runtime
//! kind, restart policy and a (possibly multi-line) runtime configuration.
//!
//! # Components
//!
//! - **`builder`** — Pure construction of descriptors from entity data
//! - **`file`** — Descriptor file naming and persistence

pub mod builder;
pub mod error;
pub mod file;

pub use builder::{
    API_VERSION, DescriptorBuilder, RestartPolicy, RuntimeConfig, RuntimeDescriptor, RuntimeKind,
    WorkloadDescriptor, workload_descriptor,
};
pub use error::{DescriptorError, DescriptorResult};
pub use file::{descriptor_path, remove_descriptor, write_descriptor};
