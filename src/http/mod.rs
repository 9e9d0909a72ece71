//! HTTP layer.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request ID, tracing, CORS, access log)
//!     → /api/*: auth.rs (bearer key) → handlers.rs → Supervisor
//!     → otherwise: static root (setup or dashboard directory)
//!     → response.rs (JSON envelope)
//! ```
//!
//! # Design Decisions
//! - Handlers only call supervisor operations; no lifecycle logic lives here
//! - Supervisor errors map to status codes in one place

pub mod access_log;
pub mod auth;
pub mod handlers;
pub mod response;
pub mod server;

pub use access_log::AccessLog;
pub use server::{build_router, serve};
