//! HTTP control plane: routing and middleware.

pub mod error;
mod services;
mod status;
mod ws;

use std::path::PathBuf;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the control-plane router with all routes and middleware.
///
/// When `static_dir` is set, unmatched paths serve the dashboard asset
/// tree from that directory.
pub fn create_router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    // The dashboard runs in a browser; keep CORS permissive.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(Any);

    let mut router = Router::new()
        .route("/api/status", get(status::get_status))
        .route("/api/list_services", get(services::list_services))
        .route("/api/list_servers", get(services::list_servers))
        .route("/api/add_service", post(services::add_service))
        .route("/api/edit_service", post(services::edit_service))
        .route("/api/remove_service", post(services::remove_service))
        .route("/api/set_service_mode", post(services::set_service_mode))
        .route("/api/add_server", post(services::add_server))
        .route("/api/edit_server", post(services::edit_server))
        .route("/api/remove_server", post(services::remove_server))
        .route("/api/socat_stats", get(status::socat_stats))
        .route(
            "/api/socat_stats_by_server",
            get(status::socat_stats_by_server),
        )
        .route("/ws", get(ws::events_ws))
        .route("/healthz", get(status::healthz));

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
