pub mod api;
pub mod realtime;

use axum::{Router, middleware, routing::get};
use std::sync::Arc;

use crate::handlers::api::health_check;
use crate::middleware::{auth_middleware, connection_limit_middleware};
use crate::state::AppState;

/// Assemble every route with its per-route middleware.
///
/// Layer order for the WebSocket route (outer to inner):
/// connection_limit -> auth -> handler. Server-wide layers (CORS, rate
/// limiting, security headers) are added by the binary.
pub fn create_app(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/healthz", get(health_check));

    let protected_routes = api::create_api_router().layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));

    let realtime_routes = realtime::create_realtime_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_limit_middleware,
        ));

    public_routes
        .merge(protected_routes)
        .merge(realtime_routes)
        .with_state(state)
}
