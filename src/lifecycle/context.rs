//! Shared panel context.

use std::sync::Arc;

use crate::config::PanelConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::supervisor::{CrashPolicy, ProcessLauncher, Supervisor, SupervisorSettings};

/// Everything the boot stages and HTTP handlers share. Built once and passed
/// explicitly; cloning is cheap.
#[derive(Debug, Clone)]
pub struct PanelContext {
    pub config: Arc<PanelConfig>,
    pub supervisor: Supervisor,
    pub shutdown: Shutdown,
}

impl PanelContext {
    /// Context with a supervisor that spawns real processes.
    pub fn new(config: PanelConfig) -> Self {
        let supervisor = Supervisor::from_config(&config);
        Self::assemble(config, supervisor)
    }

    /// Context with a custom launcher and crash policy.
    pub fn with_launcher(
        config: PanelConfig,
        launcher: Arc<dyn ProcessLauncher>,
        policy: Arc<dyn CrashPolicy>,
    ) -> Self {
        let supervisor = Supervisor::new(SupervisorSettings::from_config(&config), launcher, policy);
        Self::assemble(config, supervisor)
    }

    fn assemble(config: PanelConfig, supervisor: Supervisor) -> Self {
        Self {
            config: Arc::new(config),
            supervisor,
            shutdown: Shutdown::new(),
        }
    }
}
