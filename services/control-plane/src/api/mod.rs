//! HTTP surface: health probes only. Agents talk gRPC.

mod health;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the HTTP router with health routes and request tracing.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
