//! Staged rollout controller — drives the phase state machine.
//!
//! The controller is pure: the orchestrator performs the updates, reports
//! each phase's tallies, and acts on the returned `PhaseAction`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleetgrid_state::{EntityId, PhaseSummary};

use crate::strategy::RolloutPlan;

/// Per-phase outcome.
pub type PhaseResult = PhaseSummary;

/// The entities a phase selector resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTargets {
    pub name: String,
    pub entities: Vec<EntityId>,
}

/// Current phase of a staged rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutPhase {
    /// Rollout not started.
    Pending,
    /// Updating phase `current` (zero-based) of `total`.
    Deploying { current: usize, total: usize },
    /// Between phases; `next` starts once the wait is over.
    Waiting { next: usize, total: usize },
    /// Every phase met the threshold.
    Completed,
    /// Aborted after `phase` fell below the threshold.
    RolledBack { phase: String, reason: String },
}

/// What the orchestrator must do after a phase settles.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseAction {
    /// Sleep, then call `resume`.
    Wait(Duration),
    /// Rollout finished.
    Complete,
    /// Stop, restoring those of the phase's entities that were updated.
    Rollback {
        phase: String,
        entities: Vec<EntityId>,
    },
}

/// Resolve region selectors against `(entity id, region)` pairs.
///
/// Fails with the name of the first phase that selects nothing.
pub fn resolve_phases(
    phases: &[String],
    universe: &[(EntityId, String)],
) -> Result<Vec<PhaseTargets>, String> {
    phases
        .iter()
        .map(|phase| {
            let entities: Vec<EntityId> = universe
                .iter()
                .filter(|(_, region)| region == phase)
                .map(|(id, _)| id.clone())
                .collect();
            if entities.is_empty() {
                Err(phase.clone())
            } else {
                Ok(PhaseTargets {
                    name: phase.clone(),
                    entities,
                })
            }
        })
        .collect()
}

/// A staged rollout in progress.
#[derive(Debug, Clone)]
pub struct StagedRollout {
    pub version: String,
    pub phase: RolloutPhase,
    threshold: f64,
    wait: Duration,
    targets: Vec<PhaseTargets>,
    results: Vec<PhaseResult>,
    started_at: Option<Instant>,
}

impl StagedRollout {
    pub fn new(plan: &RolloutPlan, targets: Vec<PhaseTargets>) -> Self {
        Self {
            version: plan.version.clone(),
            phase: RolloutPhase::Pending,
            threshold: plan.success_threshold,
            wait: plan.wait(),
            targets,
            results: Vec::new(),
            started_at: None,
        }
    }

    /// Start with the first phase.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        if self.targets.is_empty() {
            self.phase = RolloutPhase::Completed;
            return;
        }
        self.phase = RolloutPhase::Deploying {
            current: 0,
            total: self.targets.len(),
        };
        info!(
            version = %self.version,
            phases = self.targets.len(),
            threshold = self.threshold,
            "started staged rollout"
        );
    }

    /// Entities of the phase being deployed.
    pub fn current(&self) -> Option<&PhaseTargets> {
        match self.phase {
            RolloutPhase::Deploying { current, .. } => self.targets.get(current),
            _ => None,
        }
    }

    /// Record the settled tallies of the current phase.
    ///
    /// Returns `None` unless a phase is being deployed.
    pub fn record(&mut self, successful: usize, failed: usize) -> Option<PhaseAction> {
        let RolloutPhase::Deploying { current, total } = self.phase else {
            return None;
        };
        let target = self.targets.get(current)?.clone();

        let attempted = successful + failed;
        let success_rate = if attempted == 0 {
            0.0
        } else {
            successful as f64 / attempted as f64
        };
        self.results.push(PhaseResult {
            phase: target.name.clone(),
            total: attempted,
            successful,
            failed,
            success_rate,
        });

        if success_rate < self.threshold {
            let reason = format!(
                "success rate {:.1}% below threshold {:.1}%",
                success_rate * 100.0,
                self.threshold * 100.0
            );
            warn!(phase = %target.name, %reason, "rolling back phase");
            self.phase = RolloutPhase::RolledBack {
                phase: target.name.clone(),
                reason,
            };
            return Some(PhaseAction::Rollback {
                phase: target.name,
                entities: target.entities,
            });
        }

        if current + 1 >= total {
            self.phase = RolloutPhase::Completed;
            info!(
                version = %self.version,
                elapsed_ms = self.started_at.map(|t| t.elapsed().as_millis() as u64),
                "staged rollout completed"
            );
            Some(PhaseAction::Complete)
        } else {
            self.phase = RolloutPhase::Waiting {
                next: current + 1,
                total,
            };
            debug!(phase = %target.name, success_rate, "phase passed, waiting");
            Some(PhaseAction::Wait(self.wait))
        }
    }

    /// Move on to the next phase after the wait.
    pub fn resume(&mut self) {
        if let RolloutPhase::Waiting { next, total } = self.phase {
            debug!(phase = next, total, "advancing to next phase");
            self.phase = RolloutPhase::Deploying {
                current: next,
                total,
            };
        }
    }

    pub fn results(&self) -> &[PhaseResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<PhaseResult> {
        self.results
    }
}
