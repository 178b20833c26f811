//! Agent process handles and their owner tasks.
//!
//! Each supervised child has exactly one owner task. Output readers feed
//! lines to it over a bounded channel, it observes the exit itself, and it
//! performs termination when asked. It is the only writer of its handle;
//! everyone else reads snapshots through a `watch` channel.
//!
//! ```text
//! stdout reader ──┐
//!                 ├─▶ mpsc(lines) ──▶ owner task ──▶ watch<AgentProcessHandle>
//! stderr reader ──┘                     ▲    │
//!            control (Stop + oneshot) ──┘    └──▶ NotificationSink
//! ```

use std::collections::VecDeque;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleet_core::{AgentHealth, LogLevel};
use fleetgrid_state::{EntityId, FleetEvent, FleetRegistry};

/// How long to wait for the OS to reap a child after SIGKILL.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the output line queue between readers and the owner.
const LINE_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub timestamp: DateTime<Utc>,
    pub stream: OutputStream,
    pub message: String,
}

/// Snapshot of a supervised agent process.
#[derive(Debug, Clone, Serialize)]
pub struct AgentProcessHandle {
    pub entity_id: EntityId,
    pub pid: Option<u32>,
    pub descriptor_path: PathBuf,
    pub base_port: u16,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub last_error: Option<String>,
    /// Most recent output lines, oldest first.
    pub output: VecDeque<OutputLine>,
    pub health: AgentHealth,
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Exited within the grace period (or had already exited).
    Graceful,
    /// Killed after the grace period expired.
    Forced,
}

/// Termination result as seen by the owner task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    Stopped(StopOutcome),
    /// Still not reaped after SIGKILL.
    Unreaped,
}

pub(crate) enum Control {
    Stop {
        grace: Duration,
        reply: oneshot::Sender<Termination>,
    },
}

/// Supervisor-side slot for one agent.
pub(crate) struct AgentSlot {
    pub state: watch::Receiver<AgentProcessHandle>,
    pub control: mpsc::Sender<Control>,
    pub task: JoinHandle<()>,
}

impl AgentSlot {
    pub fn snapshot(&self) -> AgentProcessHandle {
        self.state.borrow().clone()
    }
}

/// Everything the owner task needs besides the child itself.
pub(crate) struct OwnerContext {
    pub registry: FleetRegistry,
    pub output_capacity: usize,
}

/// Take ownership of `child` and start its reader and owner tasks.
pub(crate) fn supervise(
    mut child: Child,
    entity_id: &str,
    descriptor_path: PathBuf,
    base_port: u16,
    ctx: OwnerContext,
) -> AgentSlot {
    let (line_tx, line_rx) = mpsc::channel(LINE_QUEUE);
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, OutputStream::Stdout, line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, OutputStream::Stderr, line_tx);
    }

    let handle = AgentProcessHandle {
        entity_id: entity_id.to_string(),
        pid: child.id(),
        descriptor_path,
        base_port,
        started_at: Utc::now(),
        ended_at: None,
        exit_code: None,
        signal: None,
        last_error: None,
        output: VecDeque::new(),
        health: AgentHealth::Running,
    };
    let (state_tx, state_rx) = watch::channel(handle);
    let (control_tx, control_rx) = mpsc::channel(4);

    let owner = Owner {
        entity_id: entity_id.to_string(),
        state: state_tx,
        ctx,
    };
    let task = tokio::spawn(owner.run(child, line_rx, control_rx));

    AgentSlot {
        state: state_rx,
        control: control_tx,
        task,
    }
}

fn spawn_reader<R>(pipe: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(message)) = lines.next_line().await {
            let line = OutputLine {
                timestamp: Utc::now(),
                stream,
                message,
            };
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
}

struct Owner {
    entity_id: EntityId,
    state: watch::Sender<AgentProcessHandle>,
    ctx: OwnerContext,
}

impl Owner {
    async fn run(
        self,
        mut child: Child,
        mut lines: mpsc::Receiver<OutputLine>,
        mut control: mpsc::Receiver<Control>,
    ) {
        let mut exited = false;
        self.publish_health(AgentHealth::Running);

        loop {
            tokio::select! {
                Some(line) = lines.recv() => self.record_line(line),
                status = child.wait(), if !exited => {
                    exited = true;
                    match status {
                        Ok(status) => self.record_exit(status, false),
                        Err(e) => self.record_error(e.to_string()),
                    }
                }
                Some(cmd) = control.recv() => match cmd {
                    Control::Stop { grace, reply } => {
                        let result = self.terminate(&mut child, grace, exited).await;
                        while let Ok(line) = lines.try_recv() {
                            self.record_line(line);
                        }
                        let _ = reply.send(result);
                        break;
                    }
                },
                else => break,
            }
        }
        debug!(entity = %self.entity_id, "agent owner task finished");
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    async fn terminate(&self, child: &mut Child, grace: Duration, exited: bool) -> Termination {
        if exited {
            return Termination::Stopped(StopOutcome::Graceful);
        }

        if let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) {
            if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!(entity = %self.entity_id, pid, error = %e, "SIGTERM failed");
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                self.record_exit(status, true);
                return Termination::Stopped(StopOutcome::Graceful);
            }
            Ok(Err(e)) => self.record_error(e.to_string()),
            Err(_) => {
                warn!(entity = %self.entity_id, grace_ms = grace.as_millis() as u64, "grace period expired, killing agent");
            }
        }

        if let Err(e) = child.start_kill() {
            debug!(entity = %self.entity_id, error = %e, "SIGKILL failed");
        }
        match tokio::time::timeout(KILL_REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                self.record_exit(status, true);
                Termination::Stopped(StopOutcome::Forced)
            }
            Ok(Err(e)) => {
                self.record_error(e.to_string());
                Termination::Unreaped
            }
            Err(_) => Termination::Unreaped,
        }
    }

    fn record_line(&self, line: OutputLine) {
        debug!(entity = %self.entity_id, stream = ?line.stream, message = %line.message, "agent output");
        let capacity = self.ctx.output_capacity.max(1);
        self.state.send_modify(|h| {
            h.output.push_back(line);
            while h.output.len() > capacity {
                h.output.pop_front();
            }
        });
    }

    /// Derive health from an exit. A requested stop is always `Stopped`.
    ///
    /// The entity log and notification go out before the snapshot changes,
    /// so a reader that sees the new health also sees both.
    fn record_exit(&self, status: ExitStatus, requested: bool) {
        let health = if requested || status.success() {
            AgentHealth::Stopped
        } else {
            AgentHealth::Failed
        };

        info!(entity = %self.entity_id, code = ?status.code(), signal = ?status.signal(), %health, "agent exited");
        let (level, message) = match health {
            AgentHealth::Failed => (LogLevel::Error, format!("Agent exited unexpectedly ({status})")),
            _ => (LogLevel::Info, "Agent stopped".to_string()),
        };
        self.log(&message, level);
        self.publish_health(health);

        self.state.send_modify(|h| {
            h.ended_at = Some(Utc::now());
            h.exit_code = status.code();
            h.signal = status.signal();
            h.health = health;
        });
    }

    fn record_error(&self, error: String) {
        warn!(entity = %self.entity_id, %error, "agent process error");
        self.log(&format!("Agent error: {error}"), LogLevel::Error);
        self.publish_health(AgentHealth::Error);
        self.state.send_modify(|h| {
            h.last_error = Some(error);
            h.health = AgentHealth::Error;
        });
    }

    fn log(&self, message: &str, level: LogLevel) {
        // the entity may have been deleted while its agent was still running
        if let Err(e) = self.ctx.registry.append_log(&self.entity_id, message, level) {
            debug!(entity = %self.entity_id, error = %e, "agent log not recorded");
        }
    }

    fn publish_health(&self, health: AgentHealth) {
        self.ctx.registry.events().publish(FleetEvent::AgentStatusChanged {
            entity_id: self.entity_id.clone(),
            health,
        });
    }
}

/// Ask the owner of `slot` to stop its process.
pub(crate) async fn stop_slot(slot: AgentSlot, grace: Duration) -> Termination {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = Control::Stop {
        grace,
        reply: reply_tx,
    };
    if slot.control.send(request).await.is_err() {
        // owner already gone, so the child has been dropped and killed
        return Termination::Stopped(StopOutcome::Graceful);
    }
    let result = reply_rx
        .await
        .unwrap_or(Termination::Stopped(StopOutcome::Graceful));
    let _ = slot.task.await;
    result
}
