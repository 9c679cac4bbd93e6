//! Batch transcription with provider fallback.

use axum::{
    Json,
    extract::{Multipart, State},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::fallback::{PlanBody, TranscribeAttempt, build_plan};
use crate::core::fallback::AttemptRequest;
use crate::core::provider::{AudioFile, TranscribeRequest};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TranscribeOutput {
    pub provider_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Per-attempt options; the audio is attached once the multipart body is read.
#[derive(Debug, Clone)]
struct TranscribeOptions {
    model: String,
    language: Option<String>,
    gen_config: Option<serde_json::Value>,
}

impl From<TranscribeAttempt> for AttemptRequest<TranscribeOptions> {
    fn from(attempt: TranscribeAttempt) -> Self {
        AttemptRequest::new(
            attempt.provider_id,
            TranscribeOptions {
                model: attempt.model,
                language: attempt.language,
                gen_config: attempt.gen_config,
            },
        )
    }
}

/// `POST /transcribe`
///
/// Multipart form with a `file` part holding the audio and a `plan` part
/// holding the JSON plan.
pub async fn transcribe_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<TranscribeOutput>> {
    let mut file: Option<AudioFile> = None;
    let mut plan_body: Option<PlanBody<TranscribeAttempt>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("audio").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {e}")))?;
                file = Some(AudioFile {
                    filename,
                    content_type,
                    data,
                });
            }
            Some("plan") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read plan: {e}")))?;
                plan_body = Some(
                    serde_json::from_str(&text)
                        .map_err(|e| AppError::BadRequest(format!("Invalid plan: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::BadRequest("Missing 'file' part".to_string()))?;
    let plan_body =
        plan_body.ok_or_else(|| AppError::BadRequest("Missing 'plan' part".to_string()))?;
    run_transcribe(&state, file, plan_body).await.map(Json)
}

/// Transcribe `file` with the first provider in the plan that succeeds.
pub(crate) async fn run_transcribe(
    state: &AppState,
    file: AudioFile,
    plan_body: PlanBody<TranscribeAttempt>,
) -> AppResult<TranscribeOutput> {
    if file.data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }
    let plan = build_plan(plan_body, &state.config.fallback)?;

    let success = state
        .orchestrator
        .execute(plan, move |provider, options: TranscribeOptions| {
            let file = file.clone();
            async move {
                provider.check_model(&options.model)?;
                provider
                    .adapter()
                    .transcribe(TranscribeRequest {
                        model: options.model,
                        file,
                        language: options.language,
                        gen_config: options.gen_config,
                    })
                    .await
            }
        })
        .await?;

    info!(
        provider_id = %success.provider_id,
        attempt = success.index,
        "Transcription completed"
    );

    Ok(TranscribeOutput {
        provider_id: success.provider_id,
        text: success.value.text,
        language: success.value.language,
    })
}
