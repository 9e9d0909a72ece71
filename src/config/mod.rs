//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize; missing file = first run)
//!     → validation.rs (semantic checks)
//!     → PanelConfig (validated, immutable)
//!     → shared via Arc in PanelContext
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_first_run, ConfigError};
pub use schema::{
    CrashMode, CrashPolicyConfig, DashboardConfig, ObservabilityConfig, PanelConfig,
    PanelSettings, ServerConfig,
};
pub use validation::{validate_config, ValidationError};
