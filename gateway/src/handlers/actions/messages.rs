//! Wire types for the `/ws` action endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::app_error::AppError;
use crate::handlers::fallback::{PlanBody, TranscribeAttempt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsAction {
    AgentRun,
    AgentRunStream,
    AudioSpeak,
    AudioSpeakStream,
    AudioTranscribe,
}

impl WsAction {
    pub fn is_streaming(&self) -> bool {
        matches!(self, WsAction::AgentRunStream | WsAction::AudioSpeakStream)
    }
}

impl std::fmt::Display for WsAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WsAction::AgentRun => "agent_run",
            WsAction::AgentRunStream => "agent_run_stream",
            WsAction::AudioSpeak => "audio_speak",
            WsAction::AudioSpeakStream => "audio_speak_stream",
            WsAction::AudioTranscribe => "audio_transcribe",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WsStatus {
    /// One chunk of a streamed result; more follow.
    Streaming,
    Success,
    Error,
}

/// One request frame: `{"action": "...", "payload": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WsRequest {
    pub action: WsAction,
    pub payload: Value,
}

impl WsRequest {
    pub fn from_text(text: &str) -> Result<Self, WsResponse> {
        serde_json::from_str(text).map_err(|e| {
            // Keep the action on the error reply when it at least parsed.
            let action = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| serde_json::from_value(v["action"].clone()).ok());
            WsResponse::error(action, format!("Invalid request: {e}"))
        })
    }
}

/// `audio_transcribe` payload: a plan plus the audio inline as base64.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscribePayload {
    #[serde(flatten)]
    pub plan: PlanBody<TranscribeAttempt>,
    pub audio: String,
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

fn default_filename() -> String {
    "audio".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsResponse {
    pub status: WsStatus,
    /// `null` only when the request could not be parsed far enough to tell.
    pub action: Option<WsAction>,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WsResponse {
    pub fn success(action: WsAction, data: Value) -> Self {
        Self {
            status: WsStatus::Success,
            action: Some(action),
            data,
            error: None,
        }
    }

    pub fn streaming(action: WsAction, data: Value) -> Self {
        Self {
            status: WsStatus::Streaming,
            action: Some(action),
            data,
            error: None,
        }
    }

    pub fn error(action: Option<WsAction>, error: impl Into<String>) -> Self {
        Self {
            status: WsStatus::Error,
            action,
            data: json!({}),
            error: Some(error.into()),
        }
    }

    /// Error reply for a failed handler. Fallback failures are listed in `data`.
    pub fn from_app_error(action: WsAction, err: &AppError) -> Self {
        let mut response = Self::error(Some(action), err.to_string());
        response.data = match err {
            AppError::Fallback(fallback) if !fallback.failures().is_empty() => json!({
                "status_code": err.status_code().as_u16(),
                "failures": fallback.failures(),
            }),
            _ => json!({ "status_code": err.status_code().as_u16() }),
        };
        response
    }

    pub fn is_final(&self) -> bool {
        self.status != WsStatus::Streaming
    }
}
