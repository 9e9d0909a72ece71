//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use craft_panel::config::PanelConfig;
use craft_panel::supervisor::{
    ExitInfo, LaunchSpec, ProcessHandle, ProcessLauncher, StopSignal, SupervisorEvent,
};

/// Launcher that spawns in-memory processes.
///
/// Fake processes report no pid, so the supervisor never signals a real OS
/// process on their behalf.
#[derive(Debug, Default)]
pub struct FakeLauncher {
    launches: Mutex<Vec<LaunchSpec>>,
    exits: Mutex<Vec<mpsc::UnboundedSender<ExitInfo>>>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    ignore_interrupt: AtomicBool,
    fail_spawn: AtomicBool,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Processes launched from now on ignore SIGINT and need a kill.
    pub fn ignore_interrupt(&self, ignore: bool) {
        self.ignore_interrupt.store(ignore, Ordering::SeqCst);
    }

    /// Make every launch fail as if the program did not exist.
    pub fn fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of processes ever alive at once.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Make the most recently launched process exit on its own.
    pub fn crash_latest(&self, exit: ExitInfo) {
        let exits = self.exits.lock().unwrap();
        let tx = exits.last().expect("no process launched");
        tx.send(exit).expect("process already gone");
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ProcessHandle>> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.launches.lock().unwrap().push(spec.clone());
        self.exits.lock().unwrap().push(tx.clone());

        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now_live, Ordering::SeqCst);

        Ok(Box::new(FakeProcess {
            exit_tx: tx,
            exit_rx: rx,
            ignore_interrupt: self.ignore_interrupt.load(Ordering::SeqCst),
            live: self.live.clone(),
        }))
    }
}

struct FakeProcess {
    exit_tx: mpsc::UnboundedSender<ExitInfo>,
    exit_rx: mpsc::UnboundedReceiver<ExitInfo>,
    ignore_interrupt: bool,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        match self.exit_rx.recv().await {
            Some(exit) => Ok(exit),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "fake process lost")),
        }
    }

    fn signal(&mut self, signal: StopSignal) -> io::Result<()> {
        let exit = match signal {
            StopSignal::Interrupt if self.ignore_interrupt => return Ok(()),
            StopSignal::Interrupt => ExitInfo::code(0),
            StopSignal::Kill => ExitInfo::signal(9),
        };
        let _ = self.exit_tx.send(exit);
        Ok(())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Receive the next supervisor event or fail after a second.
pub async fn next_event(events: &mut broadcast::Receiver<SupervisorEvent>) -> SupervisorEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for supervisor event")
        .expect("event channel closed")
}

/// Config with a loopback panel on an ephemeral port and logs under `root`.
pub fn test_config(root: &Path, first_run: bool) -> PanelConfig {
    let mut config = if first_run {
        PanelConfig::first_run()
    } else {
        PanelConfig::default()
    };
    config.panel.bind_host = "127.0.0.1".to_string();
    config.panel.port = 0;
    config.panel.log_directory = root.join("logs");
    config.dashboard.setup_dir = root.join("setup");
    config.dashboard.dashboard_dir = root.join("dashboard");
    config.server.program = "fake-server".to_string();
    config.server.stop_grace_secs = 1;
    config
}

/// Write a static asset for the panel to serve.
pub fn write_asset(dir: &Path, name: &str, contents: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), contents).unwrap();
}
