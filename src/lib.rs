//! Game server control panel library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod supervisor;

pub use config::schema::PanelConfig;
pub use lifecycle::{boot, Panel, PanelContext, Shutdown};
pub use supervisor::Supervisor;
