//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, grace period, backoff bounds)
//! - Check settings that only matter once setup is complete
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PanelConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{CrashMode, PanelConfig};

/// A single semantic problem with a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.port must be non-zero")]
    ServerPortZero,

    #[error("panel.port and server.port are both {0}")]
    PortConflict(u16),

    #[error("panel.api_key must be set once setup is complete")]
    MissingApiKey,

    #[error("server.program must not be empty")]
    MissingProgram,

    #[error("server.stop_grace_secs must be greater than zero")]
    ZeroGracePeriod,

    #[error("server.crash_policy.base_delay_ms ({base}) exceeds max_delay_ms ({max})")]
    BackoffBounds { base: u64, max: u64 },
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &PanelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.program.trim().is_empty() {
        errors.push(ValidationError::MissingProgram);
    }

    if config.server.stop_grace_secs == 0 {
        errors.push(ValidationError::ZeroGracePeriod);
    }

    let policy = &config.server.crash_policy;
    if policy.mode == CrashMode::Restart && policy.base_delay_ms > policy.max_delay_ms {
        errors.push(ValidationError::BackoffBounds {
            base: policy.base_delay_ms,
            max: policy.max_delay_ms,
        });
    }

    // The setup UI runs before any of these are known.
    if !config.first_run {
        if config.server.port == 0 {
            errors.push(ValidationError::ServerPortZero);
        }
        if config.panel.port != 0 && config.panel.port == config.server.port {
            errors.push(ValidationError::PortConflict(config.server.port));
        }
        if config.panel.api_key.trim().is_empty() {
            errors.push(ValidationError::MissingApiKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
