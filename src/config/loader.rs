//! Configuration loading from disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::PanelConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file yet. Expected on first run.
    #[error("config file {} not found", .0.display())]
    Missing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

impl ConfigError {
    /// True when the panel should fall back to the setup flow.
    pub fn is_missing(&self) -> bool {
        matches!(self, ConfigError::Missing(_))
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<PanelConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };
    let config: PanelConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load configuration, treating a missing file as a first run.
///
/// The returned error, if any, is the reason the first-run defaults were used.
pub fn load_or_first_run(path: &Path) -> Result<(PanelConfig, Option<ConfigError>), ConfigError> {
    match load_config(path) {
        Ok(config) => Ok((config, None)),
        Err(e) if e.is_missing() => Ok((PanelConfig::first_run(), Some(e))),
        Err(e) => Err(e),
    }
}
