//! Supervisor behaviour against real child processes.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::process::Command;

use fleet_core::AgentHealth;
use fleet_core::config::AgentConfig;
use fleetgrid_agent::{
    AgentProcessHandle, AgentSupervisor, BoxFuture, OutputStream, RuntimeResult, StopOutcome,
    SupervisorError, WorkloadRuntime,
};
use fleetgrid_state::{EntitySpec, EventBus, FleetEvent, FleetRegistry, WorkloadSpec};

/// Runs a shell script in place of the runtime's `apply`.
struct ScriptRuntime {
    script: String,
    removed: AtomicUsize,
    applied: AtomicUsize,
}

impl ScriptRuntime {
    fn new(script: &str) -> Arc<Self> {
        Arc::new(Self {
            script: script.to_string(),
            removed: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
        })
    }
}

impl WorkloadRuntime for ScriptRuntime {
    fn apply_command(&self, _descriptor: &Path) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.script);
        cmd
    }

    fn apply<'a>(&'a self, _descriptor: &'a Path) -> BoxFuture<'a, RuntimeResult<String>> {
        Box::pin(async move {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok("applied".to_string())
        })
    }

    fn remove_container<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, RuntimeResult<()>> {
        Box::pin(async move {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    dir: std::path::PathBuf,
    bus: EventBus,
    registry: FleetRegistry,
    runtime: Arc<ScriptRuntime>,
    supervisor: AgentSupervisor,
}

fn fixture(script: &str) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("states");
    let bus = EventBus::default();
    let registry = FleetRegistry::new(Arc::new(bus.clone()));
    registry
        .create(
            EntitySpec::new("Munich", "1.0.0")
                .with_id("car-1")
                .with_workloads(vec![
                    WorkloadSpec::new("ecu-body", "v1.0"),
                    WorkloadSpec::new("ecu-safety", "v2.0"),
                ]),
        )
        .unwrap();

    let config = AgentConfig {
        descriptor_dir: dir.clone(),
        port_base: 47000,
        port_span: 500,
        ..Default::default()
    };
    let runtime = ScriptRuntime::new(script);
    let supervisor = AgentSupervisor::new(registry.clone(), runtime.clone(), &config)
        .with_stop_grace(Duration::from_millis(500));

    Fixture {
        _dir: tmp,
        dir,
        bus,
        registry,
        runtime,
        supervisor,
    }
}

async fn wait_for(
    supervisor: &AgentSupervisor,
    id: &str,
    done: impl Fn(&AgentProcessHandle) -> bool,
) -> AgentProcessHandle {
    for _ in 0..100 {
        let handle = supervisor.status(id).await.unwrap();
        if done(&handle) {
            return handle;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached for {id}");
}

#[tokio::test]
async fn spawn_writes_descriptor_and_tracks_handle() {
    let f = fixture("exec sleep 30");
    let handle = f.supervisor.spawn("car-1").await.unwrap();

    assert_eq!(handle.health, AgentHealth::Running);
    assert!(handle.pid.is_some());
    assert_eq!(handle.descriptor_path, f.dir.join("state-car-1.yaml"));
    assert!((47000..47500).contains(&handle.base_port));

    let yaml = std::fs::read_to_string(&handle.descriptor_path).unwrap();
    assert!(yaml.contains("ecu-body-car-1:"));
    assert!(yaml.contains(&format!("\"{}:80\"", handle.base_port + 1)));
    assert_eq!(f.runtime.removed.load(Ordering::SeqCst), 1);
    assert_eq!(f.supervisor.list().await.len(), 1);

    f.supervisor.stop("car-1").await.unwrap();
}

#[tokio::test]
async fn stop_removes_handle_and_descriptor() {
    let f = fixture("exec sleep 30");
    let handle = f.supervisor.spawn("car-1").await.unwrap();

    let outcome = f.supervisor.stop("car-1").await.unwrap();
    assert_eq!(outcome, StopOutcome::Graceful);
    assert!(!handle.descriptor_path.exists());
    assert!(!f.supervisor.is_running("car-1").await);
    assert!(matches!(
        f.supervisor.status("car-1").await,
        Err(SupervisorError::NotFound(_))
    ));
}

#[tokio::test]
async fn stop_missing_handle_is_not_found() {
    let f = fixture("exec sleep 30");
    let err = f.supervisor.stop("car-1").await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound(_)));
    assert_eq!(err.kind(), fleet_core::ErrorKind::NotFound);
}

#[tokio::test]
async fn term_ignoring_process_is_killed_after_grace() {
    let f = fixture("trap '' TERM; while true; do sleep 1; done");
    let handle = f.supervisor.spawn("car-1").await.unwrap();
    // let the shell install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let outcome = f.supervisor.stop("car-1").await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, StopOutcome::Forced);
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(500) + Duration::from_secs(3));
    assert!(!handle.descriptor_path.exists());
    assert!(!f.supervisor.is_running("car-1").await);
}

#[tokio::test]
async fn unexpected_exit_is_failed_and_not_respawned() {
    let f = fixture("exit 3");
    let mut rx = f.bus.subscribe();
    f.supervisor.spawn("car-1").await.unwrap();

    let handle = wait_for(&f.supervisor, "car-1", |h| h.health != AgentHealth::Running).await;
    assert_eq!(handle.health, AgentHealth::Failed);
    assert_eq!(handle.exit_code, Some(3));
    assert!(handle.ended_at.is_some());

    let mut healths = Vec::new();
    while let Ok(n) = rx.try_recv() {
        if let FleetEvent::AgentStatusChanged { health, .. } = n.event {
            healths.push(health);
        }
    }
    assert_eq!(healths, vec![AgentHealth::Running, AgentHealth::Failed]);

    let entity = f.registry.get("car-1").unwrap();
    assert!(entity.logs.iter().any(|l| l.message.starts_with("Agent exited unexpectedly")));

    // the handle stays until stopped, and stopping an exited agent is graceful
    assert_eq!(f.supervisor.list().await.len(), 1);
    assert_eq!(f.supervisor.stop("car-1").await.unwrap(), StopOutcome::Graceful);
}

#[tokio::test]
async fn clean_exit_is_stopped() {
    let f = fixture("exit 0");
    f.supervisor.spawn("car-1").await.unwrap();
    let handle = wait_for(&f.supervisor, "car-1", |h| h.health != AgentHealth::Running).await;
    assert_eq!(handle.health, AgentHealth::Stopped);
    assert_eq!(handle.exit_code, Some(0));
    f.supervisor.stop("car-1").await.unwrap();
}

#[tokio::test]
async fn output_is_captured_per_stream() {
    let f = fixture("echo \"agent $AGENT_ID in $AGENT_CITY\"; echo oops >&2; exec sleep 30");
    f.supervisor.spawn("car-1").await.unwrap();

    let handle = wait_for(&f.supervisor, "car-1", |h| h.output.len() >= 2).await;
    let stdout: Vec<_> = handle
        .output
        .iter()
        .filter(|l| l.stream == OutputStream::Stdout)
        .map(|l| l.message.as_str())
        .collect();
    let stderr: Vec<_> = handle
        .output
        .iter()
        .filter(|l| l.stream == OutputStream::Stderr)
        .map(|l| l.message.as_str())
        .collect();
    assert_eq!(stdout, vec!["agent car-1 in Munich"]);
    assert_eq!(stderr, vec!["oops"]);

    f.supervisor.stop("car-1").await.unwrap();
}

#[tokio::test]
async fn output_ring_keeps_last_fifty() {
    let f = fixture("i=1; while [ $i -le 80 ]; do echo line$i; i=$((i+1)); done; exec sleep 30");
    f.supervisor.spawn("car-1").await.unwrap();

    let handle = wait_for(&f.supervisor, "car-1", |h| {
        h.output.back().is_some_and(|l| l.message == "line80")
    })
    .await;
    assert_eq!(handle.output.len(), 50);
    assert_eq!(handle.output.front().unwrap().message, "line31");

    f.supervisor.stop("car-1").await.unwrap();
}

#[tokio::test]
async fn respawn_replaces_previous_handle() {
    let f = fixture("exec sleep 30");
    let first = f.supervisor.spawn("car-1").await.unwrap();
    let second = f.supervisor.spawn("car-1").await.unwrap();

    assert_ne!(first.pid, second.pid);
    assert_eq!(f.supervisor.list().await.len(), 1);
    assert_eq!(f.runtime.removed.load(Ordering::SeqCst), 2);
    assert!(second.descriptor_path.exists());

    f.supervisor.stop("car-1").await.unwrap();
}

#[tokio::test]
async fn spawn_unknown_entity_fails_without_side_effects() {
    let f = fixture("exec sleep 30");
    let err = f.supervisor.spawn("ghost").await.unwrap_err();
    assert!(matches!(err, SupervisorError::Registry(_)));
    assert_eq!(err.kind(), fleet_core::ErrorKind::NotFound);
    assert_eq!(f.runtime.removed.load(Ordering::SeqCst), 0);
    assert!(!f.dir.join("state-ghost.yaml").exists());
}

#[tokio::test]
async fn stop_all_stops_everything() {
    let f = fixture("exec sleep 30");
    f.registry
        .create(EntitySpec::new("Berlin", "1.0.0").with_id("car-2"))
        .unwrap();
    f.supervisor.spawn("car-1").await.unwrap();
    f.supervisor.spawn("car-2").await.unwrap();

    assert_eq!(f.supervisor.stop_all().await, 2);
    assert!(f.supervisor.list().await.is_empty());
}

#[tokio::test]
async fn redeploy_applies_new_version() {
    let f = fixture("exec sleep 30");
    let handle = f.supervisor.spawn("car-1").await.unwrap();

    let output = f
        .supervisor
        .redeploy("car-1", "2.0.0", Some("registry.local/app:2"))
        .await
        .unwrap();
    assert_eq!(output, "applied");
    assert_eq!(f.runtime.applied.load(Ordering::SeqCst), 1);

    let yaml = std::fs::read_to_string(&handle.descriptor_path).unwrap();
    assert!(yaml.contains("image: registry.local/app:2"));
    assert!(yaml.contains("ECU_VERSION=2.0.0"));
    assert!(yaml.contains(&format!("\"{}:80\"", handle.base_port)));

    f.supervisor.stop("car-1").await.unwrap();
}

#[tokio::test]
async fn redeploy_without_agent_leaves_no_descriptor() {
    let f = fixture("exec sleep 30");
    f.supervisor.redeploy("car-1", "2.0.0", None).await.unwrap();
    assert!(!f.dir.join("state-car-1.yaml").exists());
}
