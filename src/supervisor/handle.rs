//! Supervised process handle and the values it reports.
//!
//! # States
//! ```text
//! Stopped ──start──▶ Starting ──spawned──▶ Running ──stop──▶ Stopping ──exit──▶ Stopped
//!                                             │
//!                                             └──exit (not requested)──▶ Crashed
//! ```
//! A handle is created per spawn and invalidated when its exit is observed.

use std::fmt;
use std::process::ExitStatus;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of the supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ServerStatus {
    /// True while a process handle is live.
    pub fn is_live(self) -> bool {
        matches!(self, ServerStatus::Starting | ServerStatus::Running | ServerStatus::Stopping)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Public view of one spawned process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleInfo {
    /// Unique per spawn; never reused.
    pub id: Uuid,
    pub pid: Option<u32>,
    pub port: u16,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code), signal: None }
    }

    pub fn signal(signal: i32) -> Self {
        Self { code: None, signal: Some(signal) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Why the supervised process is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    /// Stopped through `stop_server` / `restart_server` / the exit hook.
    Requested { exit: ExitInfo },
    /// Died on its own.
    Crashed { exit: ExitInfo },
}

impl ExitReason {
    pub fn is_crash(&self) -> bool {
        matches!(self, ExitReason::Crashed { .. })
    }

    pub fn exit(&self) -> ExitInfo {
        match self {
            ExitReason::Requested { exit } | ExitReason::Crashed { exit } => *exit,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::Requested { .. } => "requested",
            ExitReason::Crashed { .. } => "crashed",
        }
    }
}

/// Events published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Started { handle: HandleInfo },
    Exited { handle: HandleInfo, reason: ExitReason },
}

/// Signals the supervisor sends to a live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Ask the process to shut down (SIGINT on unix).
    Interrupt,
    /// Terminate immediately.
    Kill,
}
