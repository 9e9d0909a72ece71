//! Game server control panel.
//!
//! # Architecture Overview
//!
//! ```text
//!   config/config.toml ──▶ PanelContext (config + supervisor + shutdown)
//!                                 │
//!             ┌───────────────────┴──────────────────────┐
//!             │                boot pipeline              │
//!             │  0 preinit ─▶ 1 http::construct ─▶ 2 http::launch
//!             └───────────────────┬──────────────────────┘
//!                                 ▼
//!     Browser / panel-cli ──▶ HTTP (control API, static root)
//!                                 │
//!                                 ▼
//!                           Supervisor ──▶ game server process
//!                                 ▲               │
//!                                 └── exit observer ◀┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use craft_panel::config::load_or_first_run;
use craft_panel::lifecycle::signals::shutdown_signal;
use craft_panel::observability::{logging, metrics};
use craft_panel::{boot, PanelContext};

#[derive(Parser)]
#[command(name = "craft-panel")]
#[command(about = "Control panel for a supervised game server", long_about = None)]
struct Cli {
    /// Path to the TOML config file. A missing file starts the setup flow.
    #[arg(short, long, default_value = "config/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, missing) = match load_or_first_run(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            logging::init_logging("info");
            tracing::error!(path = %cli.config.display(), error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "craft-panel starting");

    if let Some(reason) = missing {
        tracing::warn!(reason = %reason, "No configuration yet; serving setup");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let panel = boot(PanelContext::new(config)).await?;

    shutdown_signal().await;
    panel.shutdown().await?;

    Ok(())
}
