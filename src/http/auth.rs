use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::response::failure;
use crate::lifecycle::PanelContext;
use crate::supervisor::credentials::keys_match;

/// Require `Authorization: Bearer <api key>` on control routes.
pub async fn require_api_key(
    State(ctx): State<PanelContext>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(key) if keys_match(key, &ctx.supervisor.api_key()) => next.run(request).await,
        _ => {
            tracing::debug!(path = %request.uri().path(), "Rejected control request without valid API key");
            failure(StatusCode::UNAUTHORIZED, "invalid or missing API key")
        }
    }
}
