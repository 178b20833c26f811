//! fleetgrid-state — in-memory fleet registry for FleetGrid.
//!
//! Holds every entity (vehicle/agent), its workloads, a bounded log ring
//! and an append-only update history, and publishes typed notifications
//! on every change.
//!
//! # Architecture
//!
//! ```text
//! orchestrator ──┐
//! supervisor ────┼──▶ FleetRegistry ──▶ NotificationSink (EventBus)
//! operator ──────┘    Arc<RwLock<HashMap<EntityId, Entity>>>
//! ```
//!
//! The `FleetRegistry` is `Clone` + `Send` + `Sync` and can be shared
//! across async tasks. Reads return owned snapshots; a mutation either
//! applies fully or not at all.

pub mod error;
pub mod events;
pub mod registry;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use events::{EventBus, FleetEvent, Notification, NotificationSink, PhaseSummary};
pub use registry::FleetRegistry;
pub use types::*;
