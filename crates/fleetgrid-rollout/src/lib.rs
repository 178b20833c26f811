//! FleetGrid update orchestration — single, bulk and staged rollouts.
//!
//! This crate moves entities between software versions. It supports
//! single-entity updates, concurrent bulk updates, staged (canary)
//! rollouts across regions with automatic rollback when a phase misses
//! its success threshold, and explicit rollbacks.
//!
//! # Components
//!
//! - **`strategy`** — Update options and staged rollout plans
//! - **`controller`** — Staged rollout state machine (phases, threshold, rollback)
//! - **`broker`** — `DeploymentBroker` contract, request payloads, broker messages
//! - **`orchestrator`** — `UpdateOrchestrator` tying registry and broker together

pub mod broker;
pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod strategy;

pub use broker::{
    BrokerMessage, BrokerMessageKind, DeploymentBroker, DeploymentReceipt, DeploymentRequest,
    SupervisorBroker, UpdateType,
};
pub use controller::{PhaseAction, PhaseResult, PhaseTargets, RolloutPhase, StagedRollout};
pub use error::{BrokerError, BrokerResult, OrchestratorError, OrchestratorResult};
pub use orchestrator::{
    BulkUpdateResult, EntityUpdate, EntityUpdateError, RolloutReport, RolloutStatus,
    UpdateOrchestrator, UpdateReceipt,
};
pub use strategy::{RolloutPlan, UpdateOptions};
