//! Reaction to an unexpected exit of the supervised process.
//!
//! # Design Decisions
//! - The supervisor always reports a crash; the policy only decides whether
//!   to start the server again
//! - Default is report-only
//! - Restart delays use exponential backoff with jitter and give up after
//!   a bounded number of consecutive crashes

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::{CrashMode, CrashPolicyConfig};
use crate::supervisor::handle::{ExitInfo, HandleInfo};

/// What the supervisor knows about a crash when asking the policy.
#[derive(Debug, Clone)]
pub struct CrashReport {
    pub handle: HandleInfo,
    pub exit: ExitInfo,
    /// Crashes since the last start or stop requested by an operator, this one included.
    pub consecutive_crashes: u32,
    pub uptime: Duration,
}

/// Decision returned by a `CrashPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashAction {
    Report,
    RestartAfter(Duration),
}

/// Pluggable crash reaction.
pub trait CrashPolicy: Send + Sync + fmt::Debug {
    fn on_crash(&self, report: &CrashReport) -> CrashAction;
}

/// Leave the server stopped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportOnly;

impl CrashPolicy for ReportOnly {
    fn on_crash(&self, _report: &CrashReport) -> CrashAction {
        CrashAction::Report
    }
}

/// Start the server again after an exponentially growing delay.
#[derive(Debug, Clone)]
pub struct RestartWithBackoff {
    pub max_restarts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl CrashPolicy for RestartWithBackoff {
    fn on_crash(&self, report: &CrashReport) -> CrashAction {
        if report.consecutive_crashes > self.max_restarts {
            return CrashAction::Report;
        }
        CrashAction::RestartAfter(restart_delay(
            report.consecutive_crashes,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }
}

/// Build the policy selected in the config.
pub fn policy_from_config(config: &CrashPolicyConfig) -> Arc<dyn CrashPolicy> {
    match config.mode {
        CrashMode::Report => Arc::new(ReportOnly),
        CrashMode::Restart => Arc::new(RestartWithBackoff {
            max_restarts: config.max_restarts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }),
    }
}

/// Delay before restarting after the `crash_count`-th consecutive crash.
///
/// The first crash waits `base_ms`, each further crash doubles the wait, and
/// the wait never exceeds `max_ms`. Up to 10% jitter is added so a crash loop
/// does not restart on a fixed beat. A count of zero means no crash yet and
/// yields no delay.
pub fn restart_delay(crash_count: u32, base_ms: u64, max_ms: u64) -> Duration {
    let Some(doublings) = crash_count.checked_sub(1) else {
        return Duration::ZERO;
    };

    let delay_ms = 1u64
        .checked_shl(doublings)
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
        .min(max_ms);
    let jitter_ms = match delay_ms / 10 {
        0 => 0,
        spread => rand::thread_rng().gen_range(0..spread),
    };

    Duration::from_millis(delay_ms + jitter_ms)
}
