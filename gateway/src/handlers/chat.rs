//! Chat completion with provider fallback.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderName, header},
    response::{AppendHeaders, IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::fallback::{ChatAttempt, PlanBody, build_plan};
use crate::core::fallback::StreamingSuccess;
use crate::core::provider::{ChatRequest, Usage};
use crate::errors::app_error::AppResult;
use crate::state::AppState;

pub(crate) const PROVIDER_ID_HEADER: HeaderName = HeaderName::from_static("x-provider-id");

#[derive(Debug, Serialize)]
pub struct ChatOutput {
    pub provider_id: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// `POST /chat`
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanBody<ChatAttempt>>,
) -> AppResult<Json<ChatOutput>> {
    run_chat(&state, body).await.map(Json)
}

/// Run a chat plan to completion. Shared with the `/ws` action endpoint.
pub(crate) async fn run_chat(state: &AppState, body: PlanBody<ChatAttempt>) -> AppResult<ChatOutput> {
    let plan = build_plan(body, &state.config.fallback)?;

    let success = state
        .orchestrator
        .execute(plan, |provider, request: ChatRequest| async move {
            provider.check_model(&request.model)?;
            provider.adapter().chat(request).await
        })
        .await?;

    info!(
        provider_id = %success.provider_id,
        attempt = success.index,
        failed_attempts = success.failures.len(),
        "Chat completed"
    );

    Ok(ChatOutput {
        provider_id: success.provider_id,
        output: success.value.output,
        usage: success.value.usage,
    })
}

/// `POST /chat/stream`
///
/// Responds with newline-delimited JSON, one chunk per line. Failures before
/// the first chunk are ordinary error responses; after that they arrive as a
/// final `failure` line.
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanBody<ChatAttempt>>,
) -> AppResult<Response> {
    let success = open_chat_stream(&state, body).await?;

    let lines = success.stream.map(|chunk| {
        let mut line = serde_json::to_vec(&chunk)?;
        line.push(b'\n');
        Ok::<_, serde_json::Error>(Bytes::from(line))
    });

    Ok((
        AppendHeaders([
            (header::CONTENT_TYPE, "application/x-ndjson".to_string()),
            (PROVIDER_ID_HEADER, success.provider_id),
        ]),
        Body::from_stream(lines),
    )
        .into_response())
}

/// Commit to the first chat stream that produces output.
pub(crate) async fn open_chat_stream(
    state: &AppState,
    body: PlanBody<ChatAttempt>,
) -> AppResult<StreamingSuccess> {
    let plan = build_plan(body, &state.config.fallback)?;

    let success = state
        .orchestrator
        .execute_streaming(plan, |provider, request: ChatRequest| async move {
            provider.check_model(&request.model)?;
            provider.adapter().chat_stream(request).await
        })
        .await?;

    info!(
        provider_id = %success.provider_id,
        attempt = success.index,
        failed_attempts = success.failures.len(),
        "Chat stream committed"
    );

    Ok(success)
}
