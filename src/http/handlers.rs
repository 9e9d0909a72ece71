//! Control API handlers. Each one is a thin call into the supervisor.

use axum::{extract::State, response::Response};
use serde::Serialize;

use crate::http::response::success;
use crate::lifecycle::PanelContext;
use crate::supervisor::{SupervisorError, SupervisorSnapshot};

#[derive(Debug, Serialize)]
pub struct PanelStatus {
    pub version: &'static str,
    pub first_run: bool,
    pub server: SupervisorSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ApiKey {
    pub api_key: String,
}

pub async fn get_status(State(ctx): State<PanelContext>) -> Response {
    success(PanelStatus {
        version: env!("CARGO_PKG_VERSION"),
        first_run: ctx.config.first_run,
        server: ctx.supervisor.snapshot(),
    })
}

pub async fn start_server(State(ctx): State<PanelContext>) -> Result<Response, SupervisorError> {
    let handle = ctx.supervisor.start_server().await?;
    Ok(success(handle))
}

pub async fn stop_server(State(ctx): State<PanelContext>) -> Result<Response, SupervisorError> {
    ctx.supervisor.stop_server().await?;
    Ok(success(ctx.supervisor.snapshot()))
}

pub async fn restart_server(State(ctx): State<PanelContext>) -> Result<Response, SupervisorError> {
    let handle = ctx.supervisor.restart_server().await?;
    Ok(success(handle))
}

/// First run only: show the issued key to the setup UI.
pub async fn get_setup_api_key(State(ctx): State<PanelContext>) -> Response {
    success(ApiKey {
        api_key: ctx.supervisor.api_key(),
    })
}

/// First run only: issue a fresh key.
pub async fn rotate_setup_api_key(State(ctx): State<PanelContext>) -> Response {
    success(ApiKey {
        api_key: ctx.supervisor.issue_api_key(),
    })
}
