//! Spawning and signalling the supervised process.
//!
//! # Responsibilities
//! - Describe what to launch (`LaunchSpec`)
//! - Abstract the spawn (`ProcessLauncher`) and the live process (`ProcessHandle`)
//!   so the supervisor can run against a fake in tests
//! - Forward child stdout/stderr into tracing
//!
//! # Design Decisions
//! - Children are spawned with kill-on-drop; dropping the handle never orphans
//! - Graceful stop is SIGINT on unix, a hard kill elsewhere

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::supervisor::handle::{ExitInfo, StopSignal};

/// Everything needed to spawn one instance of the supervised server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub port: u16,
    pub api_key: String,
}

impl LaunchSpec {
    /// Build a spec, expanding `{port}` and `{api_key}` in the arguments.
    pub fn new(
        program: impl Into<String>,
        args: &[String],
        working_dir: Option<PathBuf>,
        port: u16,
        api_key: &str,
    ) -> Self {
        let port_str = port.to_string();
        let args = args
            .iter()
            .map(|arg| arg.replace("{port}", &port_str).replace("{api_key}", api_key))
            .collect();

        Self {
            program: program.into(),
            args,
            working_dir,
            env: vec![
                ("PANEL_SERVER_PORT".to_string(), port_str),
                ("PANEL_API_KEY".to_string(), api_key.to_string()),
            ],
            port,
            api_key: api_key.to_string(),
        }
    }
}

/// A live child process as seen by its exit observer.
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id, if the platform reports one.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit. Must be cancel safe.
    async fn wait(&mut self) -> io::Result<ExitInfo>;

    /// Deliver a stop signal without waiting.
    fn signal(&mut self, signal: StopSignal) -> io::Result<()>;
}

/// Spawns supervised processes.
pub trait ProcessLauncher: Send + Sync + fmt::Debug {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ProcessHandle>>;
}

/// Launcher backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ProcessHandle>> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, pid, "stderr"));
        }

        Ok(Box::new(ChildProcess { child, pid }))
    }
}

async fn forward_output<R>(stream: R, pid: Option<u32>, stream_name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::info!(target: "craft_panel::server_output", pid = ?pid, stream = stream_name, "{}", line);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(pid = ?pid, stream = stream_name, error = %e, "Output stream closed");
                break;
            }
        }
    }
}

/// A real child process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: Option<u32>,
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        self.child.wait().await.map(ExitInfo::from)
    }

    fn signal(&mut self, signal: StopSignal) -> io::Result<()> {
        match (signal, self.pid) {
            #[cfg(unix)]
            (StopSignal::Interrupt, Some(pid)) => send_os_signal(pid, StopSignal::Interrupt),
            _ => self.child.start_kill(),
        }
    }
}

/// Signal a process by pid. Used where the owning task cannot be reached,
/// such as the exit hook running during shutdown.
#[cfg(unix)]
pub fn send_os_signal(pid: u32, signal: StopSignal) -> io::Result<()> {
    let signo = match signal {
        StopSignal::Interrupt => libc::SIGINT,
        StopSignal::Kill => libc::SIGKILL,
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signo) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}
