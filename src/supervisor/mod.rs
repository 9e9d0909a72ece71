//! Game server supervision subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP layer / boot hand-off
//!     → controller.rs (start / stop / restart, one operation at a time)
//!     → process.rs (LaunchSpec → ProcessLauncher → ProcessHandle)
//!     → exit observer task (owns the handle, relays signals, records exit)
//!     → handle.rs events (started, exited{requested|crashed})
//!     → policy.rs on crash (report only, or restart with backoff)
//! ```
//!
//! # Design Decisions
//! - At most one live handle; restart is stop-then-start
//! - Stop is idempotent: no live process means success
//! - Crashes are events, never errors returned to a caller

pub mod controller;
pub mod credentials;
pub mod handle;
pub mod policy;
pub mod process;

pub use controller::{Supervisor, SupervisorError, SupervisorSettings, SupervisorSnapshot};
pub use handle::{ExitInfo, ExitReason, HandleInfo, ServerStatus, StopSignal, SupervisorEvent};
pub use policy::{CrashAction, CrashPolicy, CrashReport, ReportOnly, RestartWithBackoff};
pub use process::{LaunchSpec, ProcessHandle, ProcessLauncher, TokioLauncher};
