//! Route configuration.

use crate::handlers;
use crate::mw;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // OCI distribution v2 surface
        .route("/v2", get(handlers::docker::ping))
        .route("/v2/", get(handlers::docker::ping))
        .route("/v2/{repo_key}/{*rest}", get(handlers::docker::handle_v2))
        // Mirror adapters
        .route("/debian/{repo_key}/{*rest}", get(handlers::debian::handle))
        .route("/helm/{repo_key}/{*rest}", get(handlers::helm::handle))
        // Middleware layers are applied in reverse order (outermost first).
        .layer(middleware::from_fn(mw::correlation_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
