//! Exit hook: the supervised process never outlives the panel.

use crate::supervisor::Supervisor;

/// Kills the supervised process when dropped.
///
/// Installed by stage 0 and held until the panel exits, including exits that
/// unwind through `main`. Children are also spawned with kill-on-drop, which
/// covers handles dropped by the runtime.
#[derive(Debug)]
#[must_use = "the hook fires when the guard is dropped"]
pub struct ExitGuard {
    supervisor: Supervisor,
}

impl ExitGuard {
    pub fn install(supervisor: Supervisor) -> Self {
        tracing::debug!("Exit hook installed");
        Self { supervisor }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.supervisor.kill_now();
    }
}
