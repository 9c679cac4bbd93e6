//! Text-to-speech with provider fallback.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderName, header},
    response::{AppendHeaders, IntoResponse, Response},
};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};

use super::chat::PROVIDER_ID_HEADER;
use super::fallback::{PlanBody, SpeakAttempt, build_plan};
use crate::core::fallback::StreamingSuccess;
use crate::core::provider::{SpeakRequest, SpeakResponse};
use crate::core::provider::types::mime_type_for;
use crate::core::stream::StreamChunk;
use crate::errors::app_error::AppResult;
use crate::state::AppState;

const SAMPLE_RATE_HEADER: HeaderName = HeaderName::from_static("x-sample-rate");

/// Content type implied by an output format such as `mp3` or `pcm_16000`.
fn stream_content_type(output_format: Option<&str>) -> String {
    output_format
        .and_then(|format| format.split('_').next())
        .and_then(mime_type_for)
        .unwrap_or("audio/mpeg")
        .to_string()
}

/// `POST /speak`
///
/// Returns the synthesized audio as the response body.
pub async fn speak_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanBody<SpeakAttempt>>,
) -> AppResult<Response> {
    let (provider_id, speech) = run_speak(&state, body).await?;

    Ok((
        AppendHeaders([
            (header::CONTENT_TYPE, speech.content_type.clone()),
            (SAMPLE_RATE_HEADER, speech.sample_rate.to_string()),
            (PROVIDER_ID_HEADER, provider_id),
        ]),
        speech.audio,
    )
        .into_response())
}

/// Synthesize with the first provider that succeeds. Returns its id and the audio.
pub(crate) async fn run_speak(
    state: &AppState,
    body: PlanBody<SpeakAttempt>,
) -> AppResult<(String, SpeakResponse)> {
    let plan = build_plan(body, &state.config.fallback)?;

    let success = state
        .orchestrator
        .execute(plan, |provider, request: SpeakRequest| async move {
            provider.check_model(&request.model)?;
            provider.adapter().speak(request).await
        })
        .await?;

    info!(
        provider_id = %success.provider_id,
        attempt = success.index,
        bytes = success.value.audio.len(),
        content_type = %success.value.content_type,
        "Speech synthesized"
    );
    Ok((success.provider_id, success.value))
}

/// `POST /speak/stream`
///
/// Streams raw audio bytes from the first provider that produces audio. A
/// failure after that point aborts the body, so the client sees a truncated
/// transfer rather than a status code.
pub async fn speak_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlanBody<SpeakAttempt>>,
) -> AppResult<Response> {
    let (success, content_type) = open_speak_stream(&state, body).await?;

    let audio = success.stream.filter_map(|chunk| async move {
        match chunk {
            StreamChunk::AudioBytes { data } => Some(Ok(data)),
            StreamChunk::Failure(err) => {
                warn!(error = %err, "Aborting speech stream");
                Some(Err(err))
            }
            _ => None,
        }
    });

    Ok((
        AppendHeaders([
            (header::CONTENT_TYPE, content_type),
            (PROVIDER_ID_HEADER, success.provider_id),
        ]),
        Body::from_stream(audio),
    )
        .into_response())
}

/// Commit to the first speech stream that produces audio. Also returns the
/// content type implied by the winning attempt's output format.
pub(crate) async fn open_speak_stream(
    state: &AppState,
    body: PlanBody<SpeakAttempt>,
) -> AppResult<(StreamingSuccess, String)> {
    let content_types: Vec<String> = body
        .requests
        .iter()
        .map(|attempt| stream_content_type(attempt.request.output_format.as_deref()))
        .collect();
    let plan = build_plan(body, &state.config.fallback)?;

    let success = state
        .orchestrator
        .execute_streaming(plan, |provider, request: SpeakRequest| async move {
            provider.check_model(&request.model)?;
            provider.adapter().speak_stream(request).await
        })
        .await?;

    info!(
        provider_id = %success.provider_id,
        attempt = success.index,
        "Speech stream committed"
    );

    let content_type = content_types
        .get(success.index)
        .cloned()
        .unwrap_or_else(|| stream_content_type(None));
    Ok((success, content_type))
}
