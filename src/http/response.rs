//! JSON envelope for the control API.
//!
//! Success: `{"success": true, "data": ...}`
//! Failure: `{"success": false, "message": "..."}`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::supervisor::SupervisorError;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn success<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        success: true,
        data: Some(data),
        message: None,
    })
    .into_response()
}

pub fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let body: Envelope<()> = Envelope {
        success: false,
        data: None,
        message: Some(message.into()),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for SupervisorError {
    fn into_response(self) -> Response {
        let status = match &self {
            SupervisorError::AlreadyRunning(_) => StatusCode::CONFLICT,
            SupervisorError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        failure(status, self.to_string())
    }
}
