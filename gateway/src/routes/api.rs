use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{chat, providers, speak, transcribe};
use crate::state::AppState;
use std::sync::Arc;

/// Largest accepted upload for batch transcription (25 MB)
const MAX_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

/// Create the API router with protected routes
///
/// Note: Authentication middleware should be applied in main.rs after state is available
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(chat::chat_handler))
        .route("/chat/stream", post(chat::chat_stream_handler))
        .route("/speak", post(speak::speak_handler))
        .route("/speak/stream", post(speak::speak_stream_handler))
        .route(
            "/transcribe",
            post(transcribe::transcribe_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE)),
        )
        .route("/providers/configs", get(providers::list_provider_configs))
        .route("/providers/config", post(providers::create_provider_config))
        .route(
            "/providers/config/{id}",
            delete(providers::delete_provider_config),
        )
        .layer(TraceLayer::new_for_http())
}
