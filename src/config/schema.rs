//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the panel.
//! All types derive Serde traits for deserialization from config files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the control panel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PanelConfig {
    /// True until the setup flow has produced a real configuration.
    pub first_run: bool,

    /// Control panel listener, credential and log settings.
    pub panel: PanelSettings,

    /// Static asset roots for the setup UI and the dashboard.
    pub dashboard: DashboardConfig,

    /// The supervised game server process.
    pub server: ServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            first_run: false,
            panel: PanelSettings::default(),
            dashboard: DashboardConfig::default(),
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl PanelConfig {
    /// Configuration used when no config file exists yet.
    pub fn first_run() -> Self {
        Self {
            first_run: true,
            ..Self::default()
        }
    }

    /// Directory served at `/`: the setup UI on first run, the dashboard otherwise.
    pub fn static_root(&self) -> &Path {
        if self.first_run {
            &self.dashboard.setup_dir
        } else {
            &self.dashboard.dashboard_dir
        }
    }

    /// Address the control panel listens on.
    pub fn panel_address(&self) -> String {
        format!("{}:{}", self.panel.bind_host, self.panel.port)
    }
}

/// Control panel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PanelSettings {
    /// Host to bind (e.g., "0.0.0.0").
    pub bind_host: String,

    /// Control panel HTTP port.
    pub port: u16,

    /// Credential for the control API and the supervised server.
    /// Empty means a key is issued at startup.
    pub api_key: String,

    /// Directory holding the access logs. Created if missing.
    pub log_directory: PathBuf,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
            api_key: String::new(),
            log_directory: PathBuf::from("logs"),
        }
    }
}

/// Static asset directories.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub setup_dir: PathBuf,
    pub dashboard_dir: PathBuf,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            setup_dir: PathBuf::from("frontend/setup"),
            dashboard_dir: PathBuf::from("frontend/dashboard"),
        }
    }
}

/// Supervised process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port handed to the supervised process.
    pub port: u16,

    /// Executable to launch.
    pub program: String,

    /// Arguments. `{port}` and `{api_key}` are expanded at launch.
    pub args: Vec<String>,

    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,

    /// Seconds to wait after the graceful signal before killing.
    pub stop_grace_secs: u64,

    /// Reaction to an unexpected exit.
    pub crash_policy: CrashPolicyConfig,
}

impl ServerConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 25565,
            program: "java".to_string(),
            args: vec![
                "-Xmx1024M".to_string(),
                "-jar".to_string(),
                "server.jar".to_string(),
                "--port".to_string(),
                "{port}".to_string(),
                "nogui".to_string(),
            ],
            working_dir: None,
            stop_grace_secs: 30,
            crash_policy: CrashPolicyConfig::default(),
        }
    }
}

/// What to do when the supervised process dies on its own.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrashMode {
    /// Emit the exit event and leave the server stopped.
    #[default]
    Report,
    /// Start it again with exponential backoff.
    Restart,
}

/// Crash policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrashPolicyConfig {
    pub mode: CrashMode,

    /// Consecutive crashes after which restarting gives up.
    pub max_restarts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for CrashPolicyConfig {
    fn default() -> Self {
        Self {
            mode: CrashMode::Report,
            max_restarts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: PanelConfig = toml::from_str(
            r#"
            [panel]
            api_key = "abc123"
            "#,
        )
        .unwrap();

        assert!(!config.first_run);
        assert_eq!(config.panel.api_key, "abc123");
        assert_eq!(config.panel.port, 3000);
        assert_eq!(config.server.port, 25565);
        assert_eq!(config.server.crash_policy.mode, CrashMode::Report);
    }

    #[test]
    fn test_static_root_follows_first_run() {
        let mut config = PanelConfig::first_run();
        assert_eq!(config.static_root(), Path::new("frontend/setup"));

        config.first_run = false;
        assert_eq!(config.static_root(), Path::new("frontend/dashboard"));
    }

    #[test]
    fn test_crash_mode_parses_snake_case() {
        let config: PanelConfig = toml::from_str(
            r#"
            [server.crash_policy]
            mode = "restart"
            max_restarts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.server.crash_policy.mode, CrashMode::Restart);
        assert_eq!(config.server.crash_policy.max_restarts, 2);
        assert_eq!(config.server.crash_policy.base_delay_ms, 1000);
    }
}
