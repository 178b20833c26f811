//! DeploymentBroker — the contract with whatever carries updates to a target.
//!
//! Requests mirror the broker's wire payload: a target id, the version,
//! the update type, runtime properties and descriptive metadata. Out-of-band
//! status and result messages arrive on `…/updates/<entity>/status|result`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fleet_core::UpdateKind;
use fleetgrid_agent::{AgentSupervisor, BoxFuture, SupervisorError};
use fleetgrid_descriptor::RuntimeConfig;
use fleetgrid_state::{Entity, EntityId};

use crate::error::{BrokerError, BrokerResult};

/// Property key carrying the rendered runtime configuration.
pub const RUNTIME_CONFIG_PROPERTY: &str = "ankaios.runtimeConfig";

/// Host port published for broker-driven deployments.
const BROKER_HOST_PORT: u16 = 8080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Workload,
    Rollback,
}

impl From<UpdateKind> for UpdateType {
    fn from(kind: UpdateKind) -> Self {
        match kind {
            UpdateKind::Update => UpdateType::Workload,
            UpdateKind::Rollback => UpdateType::Rollback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    pub car_id: EntityId,
    pub car_name: String,
    pub region: String,
    pub timestamp: DateTime<Utc>,
}

/// One deployment handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub target_id: String,
    pub version: String,
    pub update_type: UpdateType,
    pub properties: BTreeMap<String, String>,
    pub metadata: DeploymentMetadata,
    /// Image the runtime configuration was rendered with.
    #[serde(skip)]
    pub image: String,
}

impl DeploymentRequest {
    /// Build the request moving `entity` to `version`.
    pub fn for_entity(entity: &Entity, version: &str, kind: UpdateKind, image: Option<&str>) -> Self {
        let image = image.unwrap_or(&entity.metadata.image).to_string();
        let env = [
            ("CAR_ID", entity.id.as_str()),
            ("CAR_REGION", entity.region.as_str()),
            ("CAR_STATE", entity.mode.as_str()),
            ("CAR_VERSION", version),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));
        let config = RuntimeConfig::container(
            &image,
            &format!("car-{}", entity.id),
            BROKER_HOST_PORT,
            &env,
        );

        let mut properties = BTreeMap::new();
        properties.insert(RUNTIME_CONFIG_PROPERTY.to_string(), config.render());

        Self {
            target_id: format!("target-{}", entity.id),
            version: version.to_string(),
            update_type: kind.into(),
            properties,
            metadata: DeploymentMetadata {
                car_id: entity.id.clone(),
                car_name: entity.name.clone(),
                region: entity.region.clone(),
                timestamp: Utc::now(),
            },
            image,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.metadata.car_id
    }
}

/// Broker acknowledgement of an accepted deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    pub target_id: String,
    pub message: String,
}

/// Carries deployments to their targets.
pub trait DeploymentBroker: Send + Sync {
    fn deploy<'a>(&'a self, request: &'a DeploymentRequest)
    -> BoxFuture<'a, BrokerResult<DeploymentReceipt>>;
}

/// Broker that applies deployments through the local agent supervisor.
#[derive(Clone)]
pub struct SupervisorBroker {
    supervisor: AgentSupervisor,
}

impl SupervisorBroker {
    pub fn new(supervisor: AgentSupervisor) -> Self {
        Self { supervisor }
    }
}

impl DeploymentBroker for SupervisorBroker {
    fn deploy<'a>(
        &'a self,
        request: &'a DeploymentRequest,
    ) -> BoxFuture<'a, BrokerResult<DeploymentReceipt>> {
        Box::pin(async move {
            let output = self
                .supervisor
                .redeploy(request.entity_id(), &request.version, Some(request.image.as_str()))
                .await
                .map_err(|e| match e {
                    SupervisorError::Io(_) => BrokerError::Transport(e.to_string()),
                    other => BrokerError::Rejected(other.to_string()),
                })?;
            debug!(target_id = %request.target_id, version = %request.version, "deployment applied");
            Ok(DeploymentReceipt {
                target_id: request.target_id.clone(),
                message: output.trim().to_string(),
            })
        })
    }
}

// ── Out-of-band messages ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerMessageKind {
    Status,
    Result,
}

/// A status or result message published by the broker for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub entity_id: EntityId,
    pub kind: BrokerMessageKind,
    pub payload: serde_json::Value,
}

impl BrokerMessage {
    /// Parse a message from its topic (`…/updates/<entity>/status|result`)
    /// and JSON payload.
    pub fn from_topic(topic: &str, payload: &[u8]) -> Option<Self> {
        let mut parts = topic.rsplit('/');
        let kind = match parts.next()? {
            "status" => BrokerMessageKind::Status,
            "result" => BrokerMessageKind::Result,
            _ => return None,
        };
        let entity_id = parts.next().filter(|id| !id.is_empty())?;
        if parts.next()? != "updates" {
            return None;
        }
        let payload = serde_json::from_slice(payload).ok()?;
        Some(Self {
            entity_id: entity_id.to_string(),
            kind,
            payload,
        })
    }

    /// One-line form for the entity log.
    pub fn summary(&self) -> String {
        let label = match self.kind {
            BrokerMessageKind::Status => "Update status",
            BrokerMessageKind::Result => "Update result",
        };
        format!("{label}: {}", self.payload)
    }
}
