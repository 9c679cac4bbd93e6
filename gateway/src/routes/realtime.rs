//! WebSocket routes

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{action_ws_handler, transcription_ws_handler};
use crate::state::AppState;
use std::sync::Arc;

/// Create the WebSocket router
///
/// - `GET /ws` carries action requests; see [`crate::handlers::actions`].
/// - `GET /ws/audio/transcription` carries one transcription session; see
///   [`crate::handlers::realtime`].
///
/// Uses the same auth middleware as REST endpoints; browsers may pass the
/// token as `?token=`.
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(action_ws_handler))
        .route("/ws/audio/transcription", get(transcription_ws_handler))
        .layer(TraceLayer::new_for_http())
}
