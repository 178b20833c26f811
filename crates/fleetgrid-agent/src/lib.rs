//! fleetgrid-agent — supervision of per-entity agent processes.
//!
//! Every entity is represented to the external workload runtime by at most
//! one child process running the runtime's `apply` on the entity's
//! descriptor. The supervisor owns those processes; callers only ever see
//! `AgentProcessHandle` snapshots.
//!
//! # Components
//!
//! - **`supervisor`** — spawn / stop / redeploy and the handle map
//! - **`process`** — per-handle owner task, output capture, termination
//! - **`ports`** — advisory base port allocation
//! - **`runtime`** — `WorkloadRuntime` contract and the CLI implementation
//!
//! Agents are fail-stop: an unexpected exit is recorded as `failed` health
//! and never respawned.

pub mod error;
pub mod ports;
pub mod process;
pub mod runtime;
pub mod supervisor;

pub use error::{RuntimeError, RuntimeResult, SupervisorError, SupervisorResult};
pub use ports::PortAllocator;
pub use process::{AgentProcessHandle, OutputLine, OutputStream, StopOutcome};
pub use runtime::{BoxFuture, CliRuntime, WorkloadRuntime};
pub use supervisor::AgentSupervisor;
