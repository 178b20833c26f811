//! UpdateOrchestrator — single, bulk and staged updates plus rollback.
//!
//! Every per-entity flow is the same strictly sequential sequence:
//!
//! ```text
//! begin_update (→ updating) ──▶ broker.deploy ──▶ finish_update (→ running | failed)
//! ```
//!
//! Bulk and staged operations run that sequence concurrently for many
//! entities and aggregate the outcomes. They are not transactional across
//! entities: a failure on one never undoes or blocks another, except for
//! the explicit phase rollback of a staged rollout.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleet_core::{ErrorKind, LogLevel, UpdateKind};
use fleetgrid_state::{Entity, EntityId, FleetEvent, FleetRegistry, NotificationSink};

use crate::broker::{BrokerMessage, DeploymentBroker, DeploymentReceipt, DeploymentRequest};
use crate::controller::{PhaseAction, PhaseResult, RolloutPhase, StagedRollout, resolve_phases};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::strategy::{RolloutPlan, UpdateOptions, validate_version};

/// Result of one successful update or rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReceipt {
    pub entity: Entity,
    pub receipt: DeploymentReceipt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub entity_id: EntityId,
    pub version: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpdateError {
    pub entity_id: EntityId,
    pub kind: ErrorKind,
    pub error: String,
}

/// Aggregate outcome of a bulk update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUpdateResult {
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<EntityUpdate>,
    pub errors: Vec<EntityUpdateError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RolloutStatus {
    Completed,
    RolledBack { phase: String, reason: String },
}

/// Outcome of a staged rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutReport {
    pub version: String,
    pub status: RolloutStatus,
    /// One entry per phase that ran, in order.
    pub phases: Vec<PhaseResult>,
}

impl RolloutReport {
    pub fn is_completed(&self) -> bool {
        self.status == RolloutStatus::Completed
    }
}

/// Drives updates through the registry and a deployment broker.
#[derive(Clone)]
pub struct UpdateOrchestrator {
    registry: FleetRegistry,
    broker: Arc<dyn DeploymentBroker>,
    events: Arc<dyn NotificationSink>,
}

impl UpdateOrchestrator {
    /// Create an orchestrator publishing to the registry's sink.
    pub fn new(registry: FleetRegistry, broker: Arc<dyn DeploymentBroker>) -> Self {
        let events = registry.events();
        Self {
            registry,
            broker,
            events,
        }
    }

    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    // ── Single entity ──────────────────────────────────────────────

    /// Update one entity to `version`.
    ///
    /// The entity must be parked unless `opts.force` is set. A broker
    /// failure leaves the entity `failed` with the error logged.
    pub async fn update(
        &self,
        id: &str,
        version: &str,
        opts: &UpdateOptions,
    ) -> OrchestratorResult<UpdateReceipt> {
        self.run(id, version, UpdateKind::Update, opts).await
    }

    /// Move one entity to `target` regardless of its mode.
    pub async fn rollback(&self, id: &str, target: &str) -> OrchestratorResult<UpdateReceipt> {
        self.run(id, target, UpdateKind::Rollback, &UpdateOptions::forced())
            .await
    }

    async fn run(
        &self,
        id: &str,
        version: &str,
        kind: UpdateKind,
        opts: &UpdateOptions,
    ) -> OrchestratorResult<UpdateReceipt> {
        validate_version(version)?;
        let entity = self.registry.begin_update(id, version, kind, opts.force)?;
        self.events.publish(match kind {
            UpdateKind::Update => FleetEvent::UpdateStarted {
                entity_id: id.to_string(),
                version: version.to_string(),
            },
            UpdateKind::Rollback => FleetEvent::RollbackStarted {
                entity_id: id.to_string(),
                version: version.to_string(),
            },
        });

        let request = DeploymentRequest::for_entity(&entity, version, kind, opts.image.as_deref());
        match self.broker.deploy(&request).await {
            Ok(receipt) => {
                let entity = self.registry.finish_update(id, kind, version, Ok(()))?;
                self.events.publish(match kind {
                    UpdateKind::Update => FleetEvent::UpdateCompleted {
                        entity_id: id.to_string(),
                        version: version.to_string(),
                    },
                    UpdateKind::Rollback => FleetEvent::RollbackCompleted {
                        entity_id: id.to_string(),
                        version: version.to_string(),
                        success: true,
                    },
                });
                info!(entity = %id, %version, %kind, from = %request_from(&entity), "update completed");
                Ok(UpdateReceipt { entity, receipt })
            }
            Err(source) => {
                let detail = source.to_string();
                if let Err(e) = self.registry.finish_update(id, kind, version, Err(&detail)) {
                    warn!(entity = %id, error = %e, "failed to record update failure");
                }
                self.events.publish(match kind {
                    UpdateKind::Update => FleetEvent::UpdateFailed {
                        entity_id: id.to_string(),
                        version: version.to_string(),
                        error: detail.clone(),
                    },
                    UpdateKind::Rollback => FleetEvent::RollbackCompleted {
                        entity_id: id.to_string(),
                        version: version.to_string(),
                        success: false,
                    },
                });
                warn!(entity = %id, %version, %kind, error = %detail, "update failed");
                Err(OrchestratorError::External {
                    entity: id.to_string(),
                    source,
                })
            }
        }
    }

    // ── Bulk ───────────────────────────────────────────────────────

    /// Update many entities independently and concurrently.
    ///
    /// Per-entity failures are collected in the result; only malformed
    /// request input fails the call.
    pub async fn bulk_update(
        &self,
        ids: &[EntityId],
        version: &str,
        opts: &UpdateOptions,
    ) -> OrchestratorResult<BulkUpdateResult> {
        if ids.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "bulk update needs at least one entity id".into(),
            ));
        }
        validate_version(version)?;

        let outcomes = join_all(ids.iter().map(|id| self.update(id, version, opts))).await;

        let mut result = BulkUpdateResult::default();
        for (id, outcome) in ids.iter().zip(outcomes) {
            match outcome {
                Ok(receipt) => {
                    result.successful += 1;
                    result.results.push(EntityUpdate {
                        entity_id: id.clone(),
                        version: receipt.entity.version,
                        message: receipt.receipt.message,
                    });
                }
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(EntityUpdateError {
                        entity_id: id.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            %version,
            successful = result.successful,
            failed = result.failed,
            "bulk update finished"
        );
        Ok(result)
    }

    // ── Staged rollout ─────────────────────────────────────────────

    /// Roll `plan.version` out region by region across `universe`.
    ///
    /// Each phase updates its entities concurrently. If the phase's success
    /// rate falls below the threshold, the entities the phase actually
    /// updated (successfully or not) are rolled back to the version they had
    /// when the phase began and no further phase runs. Entities rejected
    /// before any change are left alone. Repeated ids in `universe` count
    /// once. Phases selecting no entity reject the rollout up front.
    pub async fn staged_rollout(
        &self,
        plan: &RolloutPlan,
        universe: &[EntityId],
    ) -> OrchestratorResult<RolloutReport> {
        plan.validate()?;

        let mut seen = HashSet::new();
        let regions: Vec<(EntityId, String)> = universe
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| match self.registry.get(id) {
                Ok(entity) => Some((entity.id, entity.region)),
                Err(e) => {
                    warn!(entity = %id, error = %e, "skipping unknown rollout entity");
                    None
                }
            })
            .collect();
        let targets =
            resolve_phases(&plan.phases, &regions).map_err(OrchestratorError::EmptyPhase)?;

        self.events.publish(FleetEvent::StagedRolloutStarted {
            phases: plan.phases.clone(),
            version: plan.version.clone(),
        });

        let mut rollout = StagedRollout::new(plan, targets);
        rollout.start();
        let opts = plan.update_options();

        while let Some(target) = rollout.current().cloned() {
            let snapshot: HashMap<EntityId, String> = target
                .entities
                .iter()
                .filter_map(|id| self.registry.get(id).ok().map(|e| (e.id, e.version)))
                .collect();

            let outcomes = join_all(
                target
                    .entities
                    .iter()
                    .map(|id| self.update(id, &plan.version, &opts)),
            )
            .await;
            let successful = outcomes.iter().filter(|o| o.is_ok()).count();
            let failed = outcomes.len() - successful;
            let mut touched: HashSet<&str> = HashSet::new();
            for (id, outcome) in target.entities.iter().zip(&outcomes) {
                match outcome {
                    Ok(_) => {
                        touched.insert(id.as_str());
                    }
                    Err(e @ OrchestratorError::External { .. }) => {
                        touched.insert(id.as_str());
                        debug!(entity = %id, phase = %target.name, error = %e, "phase update failed");
                    }
                    Err(e) => {
                        debug!(entity = %id, phase = %target.name, error = %e, "phase update rejected");
                    }
                }
            }

            let action = rollout.record(successful, failed);
            if let Some(result) = rollout.results().last() {
                self.events.publish(FleetEvent::StagedRolloutPhaseCompleted {
                    result: result.clone(),
                });
            }

            match action {
                Some(PhaseAction::Wait(wait)) => {
                    debug!(phase = %target.name, wait_ms = wait.as_millis() as u64, "waiting before next phase");
                    tokio::time::sleep(wait).await;
                    rollout.resume();
                }
                Some(PhaseAction::Complete) => {
                    self.events.publish(FleetEvent::StagedRolloutCompleted {
                        results: rollout.results().to_vec(),
                    });
                }
                Some(PhaseAction::Rollback { phase, entities }) => {
                    let updated: Vec<EntityId> = entities
                        .into_iter()
                        .filter(|id| touched.contains(id.as_str()))
                        .collect();
                    self.rollback_phase(&phase, &updated, &snapshot).await;
                    let reason = match &rollout.phase {
                        RolloutPhase::RolledBack { reason, .. } => reason.clone(),
                        _ => String::new(),
                    };
                    self.events.publish(FleetEvent::StagedRolloutFailed { phase, error: reason });
                }
                None => break,
            }
        }

        Ok(report(rollout))
    }

    /// Restore `entities` to their pre-phase versions, concurrently.
    async fn rollback_phase(
        &self,
        phase: &str,
        entities: &[EntityId],
        snapshot: &HashMap<EntityId, String>,
    ) {
        let restores = entities
            .iter()
            .filter_map(|id| snapshot.get(id).map(|version| (id, version)))
            .map(|(id, version)| async move { (id, self.rollback(id, version).await) });

        for (id, outcome) in join_all(restores).await {
            if let Err(e) = outcome {
                warn!(entity = %id, %phase, error = %e, "phase rollback failed");
            }
        }
        info!(%phase, entities = entities.len(), "phase rolled back");
    }

    // ── Broker messages ────────────────────────────────────────────

    /// Record an out-of-band broker message in the entity's log.
    pub fn handle_broker_message(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> OrchestratorResult<BrokerMessage> {
        let message = BrokerMessage::from_topic(topic, payload).ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("unrecognised broker message on {topic}"))
        })?;
        self.registry
            .append_log(&message.entity_id, &message.summary(), LogLevel::Info)?;
        debug!(entity = %message.entity_id, kind = ?message.kind, "broker message recorded");
        Ok(message)
    }
}

/// Version the entity moved away from, per its latest history entry.
fn request_from(entity: &Entity) -> &str {
    entity
        .update_history
        .last()
        .map(|r| r.from.as_str())
        .unwrap_or("")
}

fn report(rollout: StagedRollout) -> RolloutReport {
    let status = match &rollout.phase {
        RolloutPhase::RolledBack { phase, reason } => RolloutStatus::RolledBack {
            phase: phase.clone(),
            reason: reason.clone(),
        },
        _ => RolloutStatus::Completed,
    };
    RolloutReport {
        version: rollout.version.clone(),
        status,
        phases: rollout.into_results(),
    }
}
