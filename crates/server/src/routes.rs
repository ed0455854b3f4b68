//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Request body limit for bulk ingest.
const BULK_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route(
            "/v1/bulk",
            post(handlers::post_bulk).layer(DefaultBodyLimit::max(BULK_BODY_LIMIT)),
        )
        .route("/v1/workspaces", post(handlers::create_workspace))
        .route(
            "/v1/workspaces/{id}",
            get(handlers::get_workspace).delete(handlers::delete_workspace),
        )
        .route(
            "/v1/data/{id}",
            get(handlers::get_data).delete(handlers::delete_data),
        )
        .route("/v1/admin/sweep", post(handlers::run_sweep));

    let mut router = Router::new().merge(api_routes);

    // Must be network-restricted to the Prometheus scraper when enabled.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
