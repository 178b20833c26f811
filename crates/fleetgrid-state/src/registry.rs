//! FleetRegistry — the single authoritative owner of entity state.
//!
//! Every mutation runs against a draft copy of the entity inside the write
//! lock and is committed only if the whole operation succeeds, so no partial
//! write is ever observable between fields of one entity. Notifications are
//! published after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use fleet_core::config::RegistryConfig;
use fleet_core::{EntityStatus, LogLevel, OperatingMode, UpdateKind, UpdateOutcome};

use crate::error::{RegistryError, RegistryResult};
use crate::events::{FleetEvent, NotificationSink};
use crate::types::*;

/// Thread-safe in-memory entity store.
///
/// Cheap to clone; clones share the same entities and notification sink.
#[derive(Clone)]
pub struct FleetRegistry {
    entities: Arc<RwLock<HashMap<EntityId, Entity>>>,
    events: Arc<dyn NotificationSink>,
    log_capacity: usize,
    default_image: String,
}

impl FleetRegistry {
    /// Create a registry with default configuration.
    pub fn new(events: Arc<dyn NotificationSink>) -> Self {
        Self::with_config(&RegistryConfig::default(), events)
    }

    pub fn with_config(config: &RegistryConfig, events: Arc<dyn NotificationSink>) -> Self {
        Self {
            entities: Arc::new(RwLock::new(HashMap::new())),
            events,
            log_capacity: config.log_capacity.max(1),
            default_image: config.default_image.clone(),
        }
    }

    /// The sink this registry publishes to.
    pub fn events(&self) -> Arc<dyn NotificationSink> {
        self.events.clone()
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Get a snapshot of an entity.
    pub fn get(&self, id: &str) -> RegistryResult<Entity> {
        self.entities
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.read().contains_key(id)
    }

    /// Snapshots of all entities, ordered by creation time.
    pub fn list(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn list_by_region(&self, region: &str) -> Vec<Entity> {
        self.filtered(|e| e.region == region)
    }

    pub fn list_by_mode(&self, mode: OperatingMode) -> Vec<Entity> {
        self.filtered(|e| e.mode == mode)
    }

    pub fn list_by_status(&self, status: EntityStatus) -> Vec<Entity> {
        self.filtered(|e| e.status == status)
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Fleet-wide counters.
    pub fn stats(&self) -> FleetStats {
        let entities = self.entities.read();
        let mut stats = FleetStats {
            total: entities.len(),
            ..Default::default()
        };
        for entity in entities.values() {
            *stats.by_region.entry(entity.region.clone()).or_default() += 1;
            *stats.by_mode.entry(entity.mode).or_default() += 1;
            *stats.by_status.entry(entity.status).or_default() += 1;
            *stats.by_version.entry(entity.version.clone()).or_default() += 1;
            stats.total_workloads += entity.workloads.len();
            for workload in &entity.workloads {
                *stats
                    .workload_distribution
                    .entry(workload.name.clone())
                    .or_default() += 1;
            }
        }
        stats
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Register a new entity.
    pub fn create(&self, spec: EntitySpec) -> RegistryResult<Entity> {
        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if id.trim().is_empty() {
            return Err(RegistryError::Precondition("entity id must not be empty".into()));
        }
        let short: String = id.chars().take(8).collect();
        let now = Utc::now();

        let workload_specs = spec.workloads.clone().unwrap_or_else(|| {
            vec![WorkloadSpec {
                name: format!("workload_{short}"),
                version: None,
            }]
        });
        let mut workloads: Vec<Workload> = Vec::with_capacity(workload_specs.len());
        for ws in workload_specs {
            if workloads.iter().any(|w| w.name == ws.name) {
                return Err(RegistryError::Conflict(format!(
                    "duplicate workload {} on entity {id}",
                    ws.name
                )));
            }
            workloads.push(Workload {
                version: ws.version.unwrap_or_else(|| spec.version.clone()),
                name: ws.name,
                status: EntityStatus::Running,
                added_at: now,
            });
        }

        let mut entity = Entity {
            id: id.clone(),
            name: spec.name.unwrap_or_else(|| format!("car_{short}")),
            region: spec.region,
            mode: spec.mode.unwrap_or(OperatingMode::Parked),
            status: EntityStatus::Running,
            version: spec.version,
            workloads,
            metadata: EntityMetadata {
                agent_name: id.clone(),
                image: spec.image.unwrap_or_else(|| self.default_image.clone()),
            },
            logs: Default::default(),
            update_history: Vec::new(),
            created_at: now,
            last_modified: now,
        };
        entity.push_log(
            LogLevel::Info,
            format!("Created in region {}", entity.region),
            self.log_capacity,
        );

        {
            let mut entities = self.entities.write();
            if entities.contains_key(&id) {
                return Err(RegistryError::Conflict(format!("entity {id} already exists")));
            }
            entities.insert(id.clone(), entity.clone());
        }

        info!(entity = %id, region = %entity.region, workloads = entity.workloads.len(), "entity created");
        self.events
            .publish(FleetEvent::EntityCreated(Box::new(entity.clone())));
        Ok(entity)
    }

    /// Remove an entity.
    pub fn delete(&self, id: &str) -> RegistryResult<()> {
        let removed = self.entities.write().remove(id);
        if removed.is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        info!(entity = %id, "entity deleted");
        self.events.publish(FleetEvent::EntityDeleted {
            entity_id: id.to_string(),
        });
        Ok(())
    }

    // ── Mode / status / version ────────────────────────────────────

    /// Replace the operating mode.
    pub fn set_mode(&self, id: &str, mode: OperatingMode) -> RegistryResult<Entity> {
        let cap = self.log_capacity;
        let mut old = mode;
        let entity = self.mutate(id, |entity, events| {
            old = entity.mode;
            entity.mode = mode;
            let entry = entity.push_log(LogLevel::Info, format!("Mode changed to {mode}"), cap);
            events.push(log_added(&entity.id, entry));
            Ok(())
        })?;

        info!(entity = %id, %old, new = %mode, "mode changed");
        self.events.publish(FleetEvent::ModeChanged {
            entity_id: id.to_string(),
            old,
            new: mode,
        });
        Ok(entity)
    }

    /// Parse `mode` and replace the operating mode. Unknown names fail
    /// with `Precondition` and leave the entity untouched.
    pub fn set_mode_named(&self, id: &str, mode: &str) -> RegistryResult<Entity> {
        let mode: OperatingMode = mode.parse()?;
        self.set_mode(id, mode)
    }

    /// Replace the lifecycle status.
    ///
    /// Entering `Updating` while already `Updating` is rejected; one entity
    /// never runs two update flows at once.
    pub fn set_status(&self, id: &str, status: EntityStatus) -> RegistryResult<Entity> {
        let cap = self.log_capacity;
        let entity = self.mutate(id, |entity, events| {
            if status == EntityStatus::Updating && entity.status == EntityStatus::Updating {
                return Err(RegistryError::Precondition(format!(
                    "entity {} is already updating",
                    entity.id
                )));
            }
            entity.status = status;
            let entry =
                entity.push_log(LogLevel::Info, format!("Status changed to {status}"), cap);
            events.push(log_added(&entity.id, entry));
            Ok(())
        })?;

        debug!(entity = %id, %status, "status changed");
        self.publish_updated(&entity);
        Ok(entity)
    }

    /// Parse `status` and replace the lifecycle status.
    pub fn set_status_named(&self, id: &str, status: &str) -> RegistryResult<Entity> {
        let status: EntityStatus = status.parse()?;
        self.set_status(id, status)
    }

    /// Set the current version, appending exactly one history entry.
    pub fn set_version(&self, id: &str, version: &str) -> RegistryResult<Entity> {
        let cap = self.log_capacity;
        let entity = self.mutate(id, |entity, events| {
            let from = std::mem::replace(&mut entity.version, version.to_string());
            entity.push_history(None, &from, version, UpdateOutcome::Completed);
            let entry = entity.push_log(
                LogLevel::Info,
                format!("Version updated from {from} to {version}"),
                cap,
            );
            events.push(log_added(&entity.id, entry));
            Ok(())
        })?;

        info!(entity = %id, %version, "version set");
        self.publish_updated(&entity);
        Ok(entity)
    }

    /// Mark an entity as updating ahead of an external update or rollback.
    ///
    /// Updates require a parked entity unless `force` is set; rollbacks never
    /// do. The returned snapshot still carries the pre-update version.
    pub fn begin_update(
        &self,
        id: &str,
        target: &str,
        kind: UpdateKind,
        force: bool,
    ) -> RegistryResult<Entity> {
        let cap = self.log_capacity;
        let entity = self.mutate(id, |entity, events| {
            if kind == UpdateKind::Update && !force && entity.mode != OperatingMode::Parked {
                return Err(RegistryError::Precondition(format!(
                    "entity {} must be parked to receive updates, current mode: {}",
                    entity.id, entity.mode
                )));
            }
            if entity.status == EntityStatus::Updating {
                return Err(RegistryError::Precondition(format!(
                    "entity {} is already updating",
                    entity.id
                )));
            }
            entity.status = EntityStatus::Updating;
            let message = match kind {
                UpdateKind::Update => format!("Update to version {target} started"),
                UpdateKind::Rollback => format!("Rollback initiated to version {target}"),
            };
            let entry = entity.push_log(LogLevel::Info, message, cap);
            events.push(log_added(&entity.id, entry));
            Ok(())
        })?;

        debug!(entity = %id, %target, %kind, "update begun");
        self.publish_updated(&entity);
        Ok(entity)
    }

    /// Record the terminal outcome of an update begun with `begin_update`.
    ///
    /// On success the version, its history entry and `Running` are applied
    /// together. On failure the status becomes `Failed`, the error is logged
    /// and a `Failed` history entry is appended; the version is unchanged.
    pub fn finish_update(
        &self,
        id: &str,
        kind: UpdateKind,
        target: &str,
        outcome: Result<(), &str>,
    ) -> RegistryResult<Entity> {
        let cap = self.log_capacity;
        let entity = self.mutate(id, |entity, events| {
            if entity.status != EntityStatus::Updating {
                return Err(RegistryError::Precondition(format!(
                    "entity {} is not updating (status {})",
                    entity.id, entity.status
                )));
            }
            let entry = match outcome {
                Ok(()) => {
                    let from = std::mem::replace(&mut entity.version, target.to_string());
                    let (recorded, message) = match kind {
                        UpdateKind::Update => (
                            UpdateOutcome::Completed,
                            format!("Version updated from {from} to {target}"),
                        ),
                        UpdateKind::Rollback => (
                            UpdateOutcome::RolledBack,
                            format!("Rollback completed to version {target}"),
                        ),
                    };
                    entity.push_history(None, &from, target, recorded);
                    entity.status = EntityStatus::Running;
                    entity.push_log(LogLevel::Info, message, cap)
                }
                Err(error) => {
                    let from = entity.version.clone();
                    entity.push_history(None, &from, target, UpdateOutcome::Failed);
                    entity.status = EntityStatus::Failed;
                    let message = match kind {
                        UpdateKind::Update => format!("Update failed: {error}"),
                        UpdateKind::Rollback => format!("Rollback failed: {error}"),
                    };
                    entity.push_log(LogLevel::Error, message, cap)
                }
            };
            events.push(log_added(&entity.id, entry));
            Ok(())
        })?;

        match outcome {
            Ok(()) => info!(entity = %id, %kind, version = %target, "update finished"),
            Err(error) => warn!(entity = %id, %kind, version = %target, %error, "update failed"),
        }
        self.publish_updated(&entity);
        Ok(entity)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Attach a workload. Names are unique within an entity.
    pub fn add_workload(&self, id: &str, spec: WorkloadSpec) -> RegistryResult<Entity> {
        let cap = self.log_capacity;
        let entity = self.mutate(id, |entity, events| {
            if entity.workload(&spec.name).is_some() {
                return Err(RegistryError::Conflict(format!(
                    "workload {} already exists on entity {}",
                    spec.name, entity.id
                )));
            }
            let version = spec.version.clone().unwrap_or_else(|| entity.version.clone());
            let entry = entity.push_log(
                LogLevel::Info,
                format!("Added workload {} version {version}", spec.name),
                cap,
            );
            entity.workloads.push(Workload {
                name: spec.name.clone(),
                version,
                status: EntityStatus::Running,
                added_at: Utc::now(),
            });
            events.push(log_added(&entity.id, entry));
            Ok(())
        })?;

        info!(entity = %id, workload = %spec.name, "workload added");
        self.publish_updated(&entity);
        Ok(entity)
    }

    pub fn remove_workload(&self, id: &str, workload: &str) -> RegistryResult<Entity> {
        let cap = self.log_capacity;
        let entity = self.mutate(id, |entity, events| {
            let index = entity
                .workloads
                .iter()
                .position(|w| w.name == workload)
                .ok_or_else(|| RegistryError::WorkloadNotFound {
                    entity: entity.id.clone(),
                    workload: workload.to_string(),
                })?;
            entity.workloads.remove(index);
            let entry = entity.push_log(LogLevel::Info, format!("Removed workload {workload}"), cap);
            events.push(log_added(&entity.id, entry));
            Ok(())
        })?;

        info!(entity = %id, %workload, "workload removed");
        self.publish_updated(&entity);
        Ok(entity)
    }

    /// Change one workload's version, appending a workload-tagged history entry.
    pub fn set_workload_version(
        &self,
        id: &str,
        workload: &str,
        version: &str,
    ) -> RegistryResult<Entity> {
        let cap = self.log_capacity;
        let entity = self.mutate(id, |entity, events| {
            let slot = entity
                .workloads
                .iter_mut()
                .find(|w| w.name == workload)
                .ok_or_else(|| RegistryError::WorkloadNotFound {
                    entity: id.to_string(),
                    workload: workload.to_string(),
                })?;
            let from = std::mem::replace(&mut slot.version, version.to_string());
            entity.push_history(Some(workload), &from, version, UpdateOutcome::Completed);
            let entry = entity.push_log(
                LogLevel::Info,
                format!("Workload {workload} updated from {from} to {version}"),
                cap,
            );
            events.push(log_added(&entity.id, entry));
            Ok(())
        })?;

        info!(entity = %id, %workload, %version, "workload version set");
        self.publish_updated(&entity);
        Ok(entity)
    }

    // ── Logs ───────────────────────────────────────────────────────

    /// Append a log entry, keeping only the most recent `log_capacity`.
    pub fn append_log(&self, id: &str, message: &str, level: LogLevel) -> RegistryResult<LogEntry> {
        let cap = self.log_capacity;
        let mut appended = None;
        self.mutate(id, |entity, events| {
            let entry = entity.push_log(level, message, cap);
            events.push(log_added(&entity.id, entry.clone()));
            appended = Some(entry);
            Ok(())
        })?;
        appended.ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn filtered(&self, predicate: impl Fn(&Entity) -> bool) -> Vec<Entity> {
        let mut matching: Vec<Entity> = self
            .entities
            .read()
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        matching
    }

    /// Apply `op` to a draft copy of the entity and commit it only if `op`
    /// succeeds. Events collected by `op` are published after the lock is
    /// released. Returns the committed snapshot.
    fn mutate(
        &self,
        id: &str,
        op: impl FnOnce(&mut Entity, &mut Vec<FleetEvent>) -> RegistryResult<()>,
    ) -> RegistryResult<Entity> {
        let mut pending = Vec::new();
        let committed = {
            let mut entities = self.entities.write();
            let live = entities
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let mut draft = live.clone();
            op(&mut draft, &mut pending)?;
            draft.touch();
            *live = draft.clone();
            draft
        };
        for event in pending {
            self.events.publish(event);
        }
        Ok(committed)
    }

    fn publish_updated(&self, entity: &Entity) {
        self.events
            .publish(FleetEvent::EntityUpdated(Box::new(entity.clone())));
    }
}

fn log_added(entity_id: &str, entry: LogEntry) -> FleetEvent {
    FleetEvent::LogAdded {
        entity_id: entity_id.to_string(),
        entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn test_registry() -> (FleetRegistry, EventBus) {
        let bus = EventBus::default();
        (FleetRegistry::new(Arc::new(bus.clone())), bus)
    }

    fn parked(registry: &FleetRegistry, id: &str, region: &str) -> Entity {
        registry
            .create(EntitySpec::new(region, "1.0.0").with_id(id))
            .unwrap()
    }

    #[test]
    fn create_applies_defaults() {
        let (registry, _) = test_registry();
        let entity = registry.create(EntitySpec::new("Munich", "1.0.0")).unwrap();

        assert_eq!(entity.mode, OperatingMode::Parked);
        assert_eq!(entity.status, EntityStatus::Running);
        assert_eq!(entity.name, format!("car_{}", &entity.id[..8]));
        assert_eq!(entity.metadata.agent_name, entity.id);
        assert_eq!(entity.workloads.len(), 1);
        assert_eq!(entity.workloads[0].version, "1.0.0");
        assert!(entity.update_history.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn create_duplicate_id_conflicts() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");
        let err = registry
            .create(EntitySpec::new("Berlin", "1.0.0").with_id("car-1"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
        assert_eq!(registry.get("car-1").unwrap().region, "Munich");
    }

    #[test]
    fn create_rejects_duplicate_workload_names() {
        let (registry, _) = test_registry();
        let spec = EntitySpec::new("Munich", "1.0.0").with_workloads(vec![
            WorkloadSpec::new("ecu-body", "v1.0"),
            WorkloadSpec::new("ecu-body", "v1.1"),
        ]);
        assert!(matches!(
            registry.create(spec),
            Err(RegistryError::Conflict(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn get_missing_is_not_found() {
        let (registry, _) = test_registry();
        assert_eq!(
            registry.get("nope").unwrap_err(),
            RegistryError::NotFound("nope".to_string())
        );
    }

    #[test]
    fn invalid_mode_name_is_precondition_and_changes_nothing() {
        let (registry, _) = test_registry();
        let before = parked(&registry, "car-1", "Munich");

        let err = registry.set_mode_named("car-1", "flying").unwrap_err();
        assert!(matches!(err, RegistryError::Precondition(_)));
        assert_eq!(err.kind(), fleet_core::ErrorKind::Precondition);
        assert_eq!(registry.get("car-1").unwrap(), before);
    }

    #[test]
    fn invalid_status_name_is_precondition_and_changes_nothing() {
        let (registry, _) = test_registry();
        let before = parked(&registry, "car-1", "Munich");

        let err = registry.set_status_named("car-1", "exploded").unwrap_err();
        assert!(matches!(err, RegistryError::Precondition(_)));
        assert_eq!(registry.get("car-1").unwrap(), before);
    }

    #[test]
    fn set_mode_replaces_mode_and_logs() {
        let (registry, bus) = test_registry();
        parked(&registry, "car-1", "Munich");
        let mut rx = bus.subscribe();

        let entity = registry.set_mode_named("car-1", "driving").unwrap();
        assert_eq!(entity.mode, OperatingMode::Driving);
        assert_eq!(
            entity.logs.back().unwrap().message,
            "Mode changed to driving"
        );

        let mut names = Vec::new();
        while let Ok(n) = rx.try_recv() {
            names.push(n.event.name());
        }
        assert_eq!(names, vec!["log_added", "mode_changed"]);
    }

    #[test]
    fn mutation_bumps_last_modified() {
        let (registry, _) = test_registry();
        let before = parked(&registry, "car-1", "Munich");
        let after = registry.set_status("car-1", EntityStatus::Stopped).unwrap();
        assert!(after.last_modified >= before.last_modified);
        assert_eq!(after.created_at, before.created_at);
    }

    #[test]
    fn set_status_rejects_double_updating() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");
        registry.set_status("car-1", EntityStatus::Updating).unwrap();

        let err = registry
            .set_status("car-1", EntityStatus::Updating)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Precondition(_)));
    }

    #[test]
    fn set_version_appends_exactly_one_history_entry() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");

        let entity = registry.set_version("car-1", "1.1.0").unwrap();
        assert_eq!(entity.version, "1.1.0");
        assert_eq!(entity.update_history.len(), 1);
        let record = &entity.update_history[0];
        assert_eq!(record.from, "1.0.0");
        assert_eq!(record.to, "1.1.0");
        assert_eq!(record.outcome, UpdateOutcome::Completed);
        assert!(record.workload.is_none());
    }

    #[test]
    fn begin_and_finish_update_success() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");

        let marked = registry
            .begin_update("car-1", "2.0.0", UpdateKind::Update, false)
            .unwrap();
        assert_eq!(marked.status, EntityStatus::Updating);
        assert_eq!(marked.version, "1.0.0");

        let done = registry
            .finish_update("car-1", UpdateKind::Update, "2.0.0", Ok(()))
            .unwrap();
        assert_eq!(done.status, EntityStatus::Running);
        assert_eq!(done.version, "2.0.0");
        assert_eq!(done.update_history.len(), 1);
        assert_eq!(done.update_history[0].from, "1.0.0");
    }

    #[test]
    fn finish_update_failure_keeps_version() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");
        registry
            .begin_update("car-1", "2.0.0", UpdateKind::Update, false)
            .unwrap();

        let done = registry
            .finish_update("car-1", UpdateKind::Update, "2.0.0", Err("broker down"))
            .unwrap();
        assert_eq!(done.status, EntityStatus::Failed);
        assert_eq!(done.version, "1.0.0");
        let record = done.update_history.last().unwrap();
        assert_eq!(record.outcome, UpdateOutcome::Failed);
        assert_eq!(record.to, "2.0.0");
        let log = done.logs.back().unwrap();
        assert_eq!(log.level, LogLevel::Error);
        assert_eq!(log.message, "Update failed: broker down");
    }

    #[test]
    fn rollback_records_rolled_back_outcome() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");
        registry
            .begin_update("car-1", "0.9.0", UpdateKind::Rollback, false)
            .unwrap();
        let done = registry
            .finish_update("car-1", UpdateKind::Rollback, "0.9.0", Ok(()))
            .unwrap();
        assert_eq!(done.version, "0.9.0");
        assert_eq!(
            done.update_history.last().unwrap().outcome,
            UpdateOutcome::RolledBack
        );
    }

    #[test]
    fn begin_update_twice_is_rejected() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");
        registry
            .begin_update("car-1", "2.0.0", UpdateKind::Update, false)
            .unwrap();
        let err = registry
            .begin_update("car-1", "3.0.0", UpdateKind::Update, false)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Precondition(_)));
    }

    #[test]
    fn update_requires_parked_unless_forced() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");
        let before = registry.set_mode("car-1", OperatingMode::Driving).unwrap();

        let err = registry
            .begin_update("car-1", "2.0.0", UpdateKind::Update, false)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Precondition(_)));
        assert_eq!(registry.get("car-1").unwrap(), before);

        let forced = registry
            .begin_update("car-1", "2.0.0", UpdateKind::Update, true)
            .unwrap();
        assert_eq!(forced.status, EntityStatus::Updating);
    }

    #[test]
    fn rollback_ignores_mode() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");
        registry.set_mode("car-1", OperatingMode::Driving).unwrap();
        let marked = registry
            .begin_update("car-1", "0.9.0", UpdateKind::Rollback, false)
            .unwrap();
        assert_eq!(marked.status, EntityStatus::Updating);
    }

    #[test]
    fn finish_without_begin_is_rejected() {
        let (registry, _) = test_registry();
        let before = parked(&registry, "car-1", "Munich");
        let err = registry
            .finish_update("car-1", UpdateKind::Update, "2.0.0", Ok(()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Precondition(_)));
        assert_eq!(registry.get("car-1").unwrap(), before);
    }

    #[test]
    fn workload_add_remove_and_conflicts() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");

        let entity = registry
            .add_workload("car-1", WorkloadSpec::new("ecu-safety", "v2.0"))
            .unwrap();
        assert_eq!(entity.workloads.len(), 2);

        let err = registry
            .add_workload("car-1", WorkloadSpec::new("ecu-safety", "v2.1"))
            .unwrap_err();
        assert_eq!(err.kind(), fleet_core::ErrorKind::Conflict);

        let entity = registry.remove_workload("car-1", "ecu-safety").unwrap();
        assert_eq!(entity.workloads.len(), 1);

        let err = registry.remove_workload("car-1", "ecu-safety").unwrap_err();
        assert!(matches!(err, RegistryError::WorkloadNotFound { .. }));
        assert_eq!(err.kind(), fleet_core::ErrorKind::NotFound);
    }

    #[test]
    fn workload_version_change_is_tagged_in_history() {
        let (registry, _) = test_registry();
        registry
            .create(
                EntitySpec::new("Munich", "1.0.0")
                    .with_id("car-1")
                    .with_workloads(vec![WorkloadSpec::new("ecu-body", "v1.0")]),
            )
            .unwrap();

        let entity = registry
            .set_workload_version("car-1", "ecu-body", "v1.2")
            .unwrap();
        assert_eq!(entity.workload("ecu-body").unwrap().version, "v1.2");
        assert_eq!(entity.version, "1.0.0");
        let record = entity.update_history.last().unwrap();
        assert_eq!(record.workload.as_deref(), Some("ecu-body"));
        assert_eq!(record.from, "v1.0");

        assert!(matches!(
            registry.set_workload_version("car-1", "ecu-missing", "v9"),
            Err(RegistryError::WorkloadNotFound { .. })
        ));
    }

    #[test]
    fn log_ring_keeps_last_hundred() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");

        for i in 0..150 {
            registry
                .append_log("car-1", &format!("line {i}"), LogLevel::Debug)
                .unwrap();
        }

        let entity = registry.get("car-1").unwrap();
        assert_eq!(entity.logs.len(), 100);
        assert_eq!(entity.logs.front().unwrap().message, "line 50");
        assert_eq!(entity.logs.back().unwrap().message, "line 149");
    }

    #[test]
    fn append_log_to_missing_entity_fails() {
        let (registry, _) = test_registry();
        assert!(matches!(
            registry.append_log("nope", "hello", LogLevel::Info),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn filters_and_stats() {
        let (registry, _) = test_registry();
        parked(&registry, "car-1", "Munich");
        parked(&registry, "car-2", "Munich");
        parked(&registry, "car-3", "Berlin");
        registry.set_mode("car-3", OperatingMode::Driving).unwrap();

        assert_eq!(registry.list_by_region("Munich").len(), 2);
        assert_eq!(registry.list_by_mode(OperatingMode::Driving).len(), 1);
        assert_eq!(registry.list_by_status(EntityStatus::Running).len(), 3);

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.total_workloads, 3);
        assert_eq!(stats.by_region["Munich"], 2);
        assert_eq!(stats.by_mode[&OperatingMode::Parked], 2);
        assert_eq!(stats.by_version["1.0.0"], 3);
    }

    #[test]
    fn delete_removes_and_notifies() {
        let (registry, bus) = test_registry();
        parked(&registry, "car-1", "Munich");
        let mut rx = bus.subscribe();

        registry.delete("car-1").unwrap();
        assert!(!registry.contains("car-1"));
        assert_eq!(rx.try_recv().unwrap().event.name(), "entity_deleted");

        assert!(matches!(
            registry.delete("car-1"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn snapshots_do_not_alias_live_state() {
        let (registry, _) = test_registry();
        let mut snapshot = parked(&registry, "car-1", "Munich");
        snapshot.version = "tampered".to_string();
        assert_eq!(registry.get("car-1").unwrap().version, "1.0.0");
    }
}
