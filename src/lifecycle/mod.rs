//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Boot (startup.rs, via pipeline.rs + stage.rs):
//!     preinit → http::construct → http::launch → supervisor hand-off
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → drain HTTP → stop game server → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//!
//! Exit hook (exit_hook.rs):
//!     panel exits by any path → game server killed
//! ```
//!
//! # Design Decisions
//! - Ordered startup: a stage starts only after its predecessor finished
//! - Ordered shutdown: HTTP first, then the supervised process
//! - Context is built once and passed explicitly

pub mod context;
pub mod exit_hook;
pub mod pipeline;
pub mod shutdown;
pub mod signals;
pub mod stage;
pub mod startup;

pub use context::PanelContext;
pub use exit_hook::ExitGuard;
pub use pipeline::{FnStep, Orchestrator, PipelineError, Step};
pub use shutdown::{Shutdown, ShutdownListener};
pub use stage::{StageBoard, StageError, StageEvent, StageInfo, StageSignal, StageStatus};
pub use startup::{boot, boot_pipeline, launch, BootState, Panel, StartupError};
