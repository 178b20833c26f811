//! Fleet notifications — typed events broadcast to subscribers.
//!
//! Delivery is best-effort: events published while nobody is subscribed
//! are dropped, slow subscribers observe `RecvError::Lagged`, and late
//! subscribers never see earlier events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use fleet_core::{AgentHealth, OperatingMode};

use crate::types::{Entity, EntityId, LogEntry};

/// Per-phase outcome of a staged rollout, as carried by notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseSummary {
    pub phase: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// A typed fleet event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FleetEvent {
    EntityCreated(Box<Entity>),
    EntityUpdated(Box<Entity>),
    EntityDeleted {
        entity_id: EntityId,
    },
    ModeChanged {
        entity_id: EntityId,
        old: OperatingMode,
        new: OperatingMode,
    },
    UpdateStarted {
        entity_id: EntityId,
        version: String,
    },
    UpdateCompleted {
        entity_id: EntityId,
        version: String,
    },
    UpdateFailed {
        entity_id: EntityId,
        version: String,
        error: String,
    },
    RollbackStarted {
        entity_id: EntityId,
        version: String,
    },
    RollbackCompleted {
        entity_id: EntityId,
        version: String,
        success: bool,
    },
    StagedRolloutStarted {
        phases: Vec<String>,
        version: String,
    },
    StagedRolloutPhaseCompleted {
        result: PhaseSummary,
    },
    StagedRolloutCompleted {
        results: Vec<PhaseSummary>,
    },
    StagedRolloutFailed {
        phase: String,
        error: String,
    },
    AgentStatusChanged {
        entity_id: EntityId,
        health: AgentHealth,
    },
    LogAdded {
        entity_id: EntityId,
        entry: LogEntry,
    },
}

impl FleetEvent {
    /// Wire name of the event (`update_started`, `log_added`, …).
    pub fn name(&self) -> &'static str {
        match self {
            FleetEvent::EntityCreated(_) => "entity_created",
            FleetEvent::EntityUpdated(_) => "entity_updated",
            FleetEvent::EntityDeleted { .. } => "entity_deleted",
            FleetEvent::ModeChanged { .. } => "mode_changed",
            FleetEvent::UpdateStarted { .. } => "update_started",
            FleetEvent::UpdateCompleted { .. } => "update_completed",
            FleetEvent::UpdateFailed { .. } => "update_failed",
            FleetEvent::RollbackStarted { .. } => "rollback_started",
            FleetEvent::RollbackCompleted { .. } => "rollback_completed",
            FleetEvent::StagedRolloutStarted { .. } => "staged_rollout_started",
            FleetEvent::StagedRolloutPhaseCompleted { .. } => "staged_rollout_phase_completed",
            FleetEvent::StagedRolloutCompleted { .. } => "staged_rollout_completed",
            FleetEvent::StagedRolloutFailed { .. } => "staged_rollout_failed",
            FleetEvent::AgentStatusChanged { .. } => "agent_status_changed",
            FleetEvent::LogAdded { .. } => "log_added",
        }
    }
}

/// An event stamped with its publication time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    #[serde(flatten)]
    pub event: FleetEvent,
    pub timestamp: DateTime<Utc>,
}

/// Receiver side of fleet notifications.
pub trait NotificationSink: Send + Sync {
    /// Publish an event. Must not block.
    fn publish(&self, event: FleetEvent);
}

/// Broadcast-channel backed notification sink.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for EventBus {
    fn publish(&self, event: FleetEvent) {
        let name = event.name();
        let notification = Notification {
            event,
            timestamp: Utc::now(),
        };
        if self.tx.send(notification).is_err() {
            trace!(event = name, "no subscribers, event dropped");
        }
    }
}
