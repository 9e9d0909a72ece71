//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: control API, setup endpoints, static root fallback
//! - Wire up middleware (request ID, tracing, CORS, access log)
//! - Serve on a bound listener until shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::http::access_log::{record_access, AccessLog};
use crate::http::{auth, handlers};
use crate::lifecycle::shutdown::ShutdownListener;
use crate::lifecycle::PanelContext;

/// Build the panel router.
///
/// Setup endpoints exist only on first run. Everything outside `/api` is
/// served from the static root (setup UI on first run, dashboard otherwise).
pub fn build_router(ctx: &PanelContext, access_log: Arc<AccessLog>) -> Router {
    let mut api = Router::new()
        .route("/status", get(handlers::get_status))
        .route("/server/start", post(handlers::start_server))
        .route("/server/stop", post(handlers::stop_server))
        .route("/server/restart", post(handlers::restart_server))
        .route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::require_api_key,
        ));

    if ctx.config.first_run {
        api = api.route(
            "/setup/apikey",
            get(handlers::get_setup_api_key).post(handlers::rotate_setup_api_key),
        );
    }

    let static_root = ctx.config.static_root();
    tracing::debug!(static_root = %static_root.display(), "Serving static files");

    Router::new()
        .nest("/api", api)
        .fallback_service(ServeDir::new(static_root))
        .with_state(ctx.clone())
        .layer(middleware::from_fn_with_state(access_log, record_access))
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Serve `router` on `listener` until `shutdown` fires, then drain.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: ShutdownListener,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.recv())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
