//! The process supervisor.
//!
//! Owns at most one live handle. Lifecycle operations (start, stop, restart)
//! are serialized by an async operation lock; handle state sits behind a short
//! synchronous lock so status reads and the exit hook never wait on a stop in
//! progress.
//!
//! Each spawn gets an exit observer task that owns the `ProcessHandle`, relays
//! stop signals to it, and records the exit. The observer is the only place a
//! handle is invalidated.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::config::PanelConfig;
use crate::observability::metrics;
use crate::supervisor::credentials::{generate_api_key, mask_api_key};
use crate::supervisor::handle::{
    ExitInfo, ExitReason, HandleInfo, ServerStatus, StopSignal, SupervisorEvent,
};
use crate::supervisor::policy::{policy_from_config, CrashAction, CrashPolicy, CrashReport};
use crate::supervisor::process::{LaunchSpec, ProcessHandle, ProcessLauncher, TokioLauncher};

/// Errors returned to callers of supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("server is already running (pid {:?})", .0.pid)]
    AlreadyRunning(HandleInfo),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Static launch settings for the supervised process.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Initial port; `set_port` overrides it.
    pub port: u16,
    /// Empty means a key is issued on construction.
    pub api_key: String,
    pub stop_grace: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &PanelConfig) -> Self {
        Self {
            program: config.server.program.clone(),
            args: config.server.args.clone(),
            working_dir: config.server.working_dir.clone(),
            port: config.server.port,
            api_key: config.panel.api_key.clone(),
            stop_grace: config.server.stop_grace(),
        }
    }
}

/// Point-in-time view for the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorSnapshot {
    pub status: ServerStatus,
    /// A process handle exists (starting, running or stopping).
    pub live: bool,
    pub port: u16,
    pub handle: Option<HandleInfo>,
    pub last_exit: Option<ExitReason>,
    pub consecutive_crashes: u32,
}

/// Supervisor for the game server process. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

struct Shared {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    stop_grace: Duration,
    launcher: Arc<dyn ProcessLauncher>,
    policy: Arc<dyn CrashPolicy>,
    ops: tokio::sync::Mutex<()>,
    state: Mutex<State>,
    events: broadcast::Sender<SupervisorEvent>,
}

struct State {
    port: u16,
    api_key: String,
    status: ServerStatus,
    live: Option<LiveProcess>,
    last_exit: Option<ExitReason>,
    consecutive_crashes: u32,
    /// Bumped by every stop; a crash restart scheduled under an older epoch is dropped.
    stop_epoch: u64,
}

struct LiveProcess {
    info: HandleInfo,
    started: Instant,
    /// Set when `kill_now` signalled the pid directly, bypassing the observer.
    force_killed: bool,
    signals: mpsc::UnboundedSender<StopSignal>,
    exited: watch::Receiver<bool>,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        launcher: Arc<dyn ProcessLauncher>,
        policy: Arc<dyn CrashPolicy>,
    ) -> Self {
        let api_key = if settings.api_key.is_empty() {
            let key = generate_api_key();
            tracing::info!(api_key = %mask_api_key(&key), "Issued new API key");
            key
        } else {
            settings.api_key
        };
        let (events, _) = broadcast::channel(64);

        Self {
            shared: Arc::new(Shared {
                program: settings.program,
                args: settings.args,
                working_dir: settings.working_dir,
                stop_grace: settings.stop_grace,
                launcher,
                policy,
                ops: tokio::sync::Mutex::new(()),
                state: Mutex::new(State {
                    port: settings.port,
                    api_key,
                    status: ServerStatus::Stopped,
                    live: None,
                    last_exit: None,
                    consecutive_crashes: 0,
                    stop_epoch: 0,
                }),
                events,
            }),
        }
    }

    /// Supervisor spawning real processes with the configured crash policy.
    pub fn from_config(config: &PanelConfig) -> Self {
        Self::new(
            SupervisorSettings::from_config(config),
            Arc::new(TokioLauncher),
            policy_from_config(&config.server.crash_policy),
        )
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Port for the next start. A running process keeps its port.
    pub fn set_port(&self, port: u16) {
        let mut state = self.state();
        if state.port != port {
            tracing::info!(port, "Server port set; applies on next start");
            state.port = port;
        }
    }

    pub fn port(&self) -> u16 {
        self.state().port
    }

    /// Credential handed to the supervised server and required by the control API.
    pub fn api_key(&self) -> String {
        self.state().api_key.clone()
    }

    /// Replace the credential. A running process keeps the old one until restarted.
    pub fn issue_api_key(&self) -> String {
        let key = generate_api_key();
        self.state().api_key = key.clone();
        tracing::info!(api_key = %mask_api_key(&key), "Issued new API key");
        key
    }

    pub fn status(&self) -> ServerStatus {
        self.state().status
    }

    /// The live handle, if any.
    pub fn handle(&self) -> Option<HandleInfo> {
        self.state().live.as_ref().map(|live| live.info.clone())
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        let state = self.state();
        SupervisorSnapshot {
            status: state.status,
            live: state.status.is_live(),
            port: state.port,
            handle: state.live.as_ref().map(|live| live.info.clone()),
            last_exit: state.last_exit,
            consecutive_crashes: state.consecutive_crashes,
        }
    }

    /// Subscribe to started/exited events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.events.subscribe()
    }

    /// Spawn the server. Fails if a process is already live.
    pub async fn start_server(&self) -> Result<HandleInfo, SupervisorError> {
        let _op = self.shared.ops.lock().await;
        self.start_locked(true)
    }

    /// Stop the server: interrupt, then kill after the grace period.
    /// Succeeds without doing anything when no process is live.
    pub async fn stop_server(&self) -> Result<(), SupervisorError> {
        let _op = self.shared.ops.lock().await;
        self.stop_locked().await;
        Ok(())
    }

    /// Stop the live process (if any), wait for its exit, then start a new one.
    pub async fn restart_server(&self) -> Result<HandleInfo, SupervisorError> {
        let _op = self.shared.ops.lock().await;
        self.stop_locked().await;
        self.start_locked(true)
    }

    /// Kill the live process immediately without waiting. Safe to call from
    /// synchronous shutdown paths.
    pub fn kill_now(&self) {
        let mut state = self.state();
        let Some(live) = state.live.as_mut() else {
            return;
        };
        // Without a pid the kill goes through the observer, which records it.
        live.force_killed = cfg!(unix) && live.info.pid.is_some();
        tracing::warn!(handle = %live.info.id, pid = ?live.info.pid, "Killing server before exit");
        if let Err(e) = force_kill(live) {
            tracing::error!(pid = ?live.info.pid, error = %e, "Failed to kill server");
        }
    }

    fn start_locked(&self, operator: bool) -> Result<HandleInfo, SupervisorError> {
        let spec = {
            let mut state = self.state();
            if let Some(live) = &state.live {
                return Err(SupervisorError::AlreadyRunning(live.info.clone()));
            }
            if operator {
                state.consecutive_crashes = 0;
            }
            state.status = ServerStatus::Starting;
            LaunchSpec::new(
                self.shared.program.clone(),
                &self.shared.args,
                self.shared.working_dir.clone(),
                state.port,
                &state.api_key,
            )
        };

        tracing::info!(program = %spec.program, port = spec.port, "Starting server");

        let process = match self.shared.launcher.launch(&spec) {
            Ok(process) => process,
            Err(source) => {
                self.state().status = ServerStatus::Stopped;
                metrics::record_spawn_failure();
                tracing::error!(program = %spec.program, error = %source, "Failed to spawn server");
                return Err(SupervisorError::Spawn {
                    program: spec.program,
                    source,
                });
            }
        };

        let info = HandleInfo {
            id: Uuid::new_v4(),
            pid: process.id(),
            port: spec.port,
        };
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = watch::channel(false);

        {
            let mut state = self.state();
            state.live = Some(LiveProcess {
                info: info.clone(),
                started: Instant::now(),
                force_killed: false,
                signals: signals_tx,
                exited: exited_rx,
            });
            // No readiness protocol: running as soon as the spawn succeeds.
            state.status = ServerStatus::Running;
        }

        let _ = self.shared.events.send(SupervisorEvent::Started {
            handle: info.clone(),
        });
        metrics::record_server_start();
        tracing::info!(handle = %info.id, pid = ?info.pid, port = info.port, "Server running");

        tokio::spawn(self.clone().observe(info.clone(), process, signals_rx, exited_tx));

        Ok(info)
    }

    async fn stop_locked(&self) {
        let (info, signals, mut exited) = {
            let mut state = self.state();
            state.consecutive_crashes = 0;
            state.stop_epoch += 1;
            let Some(live) = state.live.as_ref() else {
                if state.status == ServerStatus::Crashed {
                    state.status = ServerStatus::Stopped;
                }
                return;
            };
            let parts = (live.info.clone(), live.signals.clone(), live.exited.clone());
            state.status = ServerStatus::Stopping;
            parts
        };

        tracing::info!(handle = %info.id, pid = ?info.pid, "Stopping server");
        let _ = signals.send(StopSignal::Interrupt);

        let grace = self.shared.stop_grace;
        if tokio::time::timeout(grace, wait_exited(&mut exited)).await.is_err() {
            tracing::warn!(
                handle = %info.id,
                grace_ms = grace.as_millis() as u64,
                "Server ignored interrupt; killing"
            );
            let _ = signals.send(StopSignal::Kill);
            wait_exited(&mut exited).await;
        }

        // The exit may have been a crash that raced this stop; its restart is moot.
        self.state().stop_epoch += 1;
    }

    /// Exit observer for one handle.
    async fn observe(
        self,
        info: HandleInfo,
        mut process: Box<dyn ProcessHandle>,
        mut signals: mpsc::UnboundedReceiver<StopSignal>,
        exited: watch::Sender<bool>,
    ) {
        // An exit counts as requested only if a stop signal reached the
        // process before it exited.
        let mut signalled = false;
        let result = loop {
            tokio::select! {
                biased;
                result = process.wait() => break result,
                Some(signal) = signals.recv() => {
                    signalled = true;
                    tracing::debug!(handle = %info.id, ?signal, "Signalling server");
                    if let Err(e) = process.signal(signal) {
                        tracing::warn!(handle = %info.id, ?signal, error = %e, "Failed to signal server");
                    }
                }
            }
        };
        drop(process);

        let exit = result.unwrap_or_else(|e| {
            tracing::warn!(handle = %info.id, error = %e, "Failed to collect server exit status");
            ExitInfo::default()
        });

        let (reason, crash, epoch) = {
            let mut state = self.state();
            let live = match state.live.take() {
                Some(live) if live.info.id == info.id => live,
                other => {
                    state.live = other;
                    let _ = exited.send(true);
                    return;
                }
            };

            let reason = if signalled || live.force_killed {
                state.status = ServerStatus::Stopped;
                ExitReason::Requested { exit }
            } else {
                state.status = ServerStatus::Crashed;
                state.consecutive_crashes += 1;
                ExitReason::Crashed { exit }
            };
            state.last_exit = Some(reason);

            let crash = reason.is_crash().then(|| CrashReport {
                handle: info.clone(),
                exit,
                consecutive_crashes: state.consecutive_crashes,
                uptime: live.started.elapsed(),
            });
            (reason, crash, state.stop_epoch)
        };

        if reason.is_crash() {
            tracing::warn!(
                handle = %info.id,
                pid = ?info.pid,
                %exit,
                clean = exit.success(),
                "Server exited unexpectedly"
            );
        } else {
            tracing::info!(handle = %info.id, pid = ?info.pid, %exit, "Server stopped");
        }
        metrics::record_server_exit(reason.label());

        let _ = self.shared.events.send(SupervisorEvent::Exited {
            handle: info,
            reason,
        });
        let _ = exited.send(true);

        if let Some(report) = crash {
            self.apply_crash_policy(report, epoch);
        }
    }

    fn apply_crash_policy(&self, report: CrashReport, epoch: u64) {
        match self.shared.policy.on_crash(&report) {
            CrashAction::Report => {}
            CrashAction::RestartAfter(delay) => {
                tracing::info!(
                    attempt = report.consecutive_crashes,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling restart of crashed server"
                );
                let supervisor = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    supervisor.restart_after_crash(epoch).await;
                });
            }
        }
    }

    async fn restart_after_crash(&self, epoch: u64) {
        let _op = self.shared.ops.lock().await;
        // An operator may have acted during the delay.
        let current = {
            let state = self.state();
            (state.status, state.stop_epoch)
        };
        if current != (ServerStatus::Crashed, epoch) {
            tracing::debug!("Skipping crash restart; server state changed");
            return;
        }
        if let Err(e) = self.start_locked(false) {
            tracing::error!(error = %e, "Crash restart failed");
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Supervisor")
            .field("program", &self.shared.program)
            .field("status", &state.status)
            .field("port", &state.port)
            .field("handle", &state.live.as_ref().map(|live| &live.info))
            .finish()
    }
}

async fn wait_exited(exited: &mut watch::Receiver<bool>) {
    // A dropped sender means the observer is gone, which is also an exit.
    let _ = exited.wait_for(|done| *done).await;
}

#[cfg(unix)]
fn force_kill(live: &LiveProcess) -> io::Result<()> {
    match live.info.pid {
        Some(pid) => crate::supervisor::process::send_os_signal(pid, StopSignal::Kill),
        None => signal_observer(live, StopSignal::Kill),
    }
}

#[cfg(not(unix))]
fn force_kill(live: &LiveProcess) -> io::Result<()> {
    signal_observer(live, StopSignal::Kill)
}

fn signal_observer(live: &LiveProcess, signal: StopSignal) -> io::Result<()> {
    live.signals
        .send(signal)
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "exit observer is gone"))
}
