//! Client and server messages of the realtime transcription protocol.
//!
//! Client text frames are JSON objects of three shapes:
//!
//! - an initialization payload, which must come first
//!   (`{"provider_id", "model", "language", "input_sample_rate", "input_encoding", "gen_config"}`);
//! - `{"audio": "<base64>"}`, equivalent to a binary frame carrying raw audio;
//! - `{"type": "close"}`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::session::{CloseReason, SessionError};
use crate::core::audio::{AudioEncoding, AudioFormat};
use crate::core::provider::RealtimeTranscriptionConfig;

/// Default input sample rate when the client does not name one.
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 24000;

fn default_language() -> String {
    "auto".to_string()
}

fn default_input_sample_rate() -> u32 {
    DEFAULT_INPUT_SAMPLE_RATE
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitMessage {
    #[serde(alias = "provider_uid")]
    pub provider_id: String,
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,
    #[serde(default)]
    pub input_encoding: AudioEncoding,
    #[serde(default)]
    pub gen_config: Option<Value>,
}

impl InitMessage {
    pub fn input_format(&self) -> AudioFormat {
        AudioFormat::new(self.input_sample_rate, self.input_encoding)
    }

    pub fn transcription_config(&self) -> RealtimeTranscriptionConfig {
        let language = match self.language.trim() {
            "" | "auto" => None,
            other => Some(other.to_string()),
        };
        RealtimeTranscriptionConfig {
            model: self.model.clone(),
            language,
            gen_config: self.gen_config.clone().filter(|v| !v.is_null()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Init(InitMessage),
    Audio(Bytes),
    Close,
}

impl ClientMessage {
    pub fn from_text(text: &str) -> Result<Self, SessionError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| SessionError::InvalidMessage(format!("Invalid JSON: {e}")))?;
        if !value.is_object() {
            return Err(SessionError::InvalidMessage(
                "Message must be a JSON object".to_string(),
            ));
        }

        if let Some(kind) = value.get("type").and_then(Value::as_str) {
            match kind {
                "close" => return Ok(ClientMessage::Close),
                "init" | "initialize" => {}
                other => {
                    return Err(SessionError::InvalidMessage(format!(
                        "Unknown message type '{other}'"
                    )));
                }
            }
        }

        if let Some(audio) = value.get("audio") {
            let encoded = audio.as_str().ok_or_else(|| {
                SessionError::InvalidAudio("'audio' must be a base64 string".to_string())
            })?;
            let data = BASE64
                .decode(encoded)
                .map_err(|e| SessionError::InvalidAudio(format!("Invalid base64: {e}")))?;
            return Ok(ClientMessage::Audio(Bytes::from(data)));
        }

        InitMessage::deserialize(value)
            .map(ClientMessage::Init)
            .map_err(|e| SessionError::InvalidMessage(format!("Invalid initialization request: {e}")))
    }

    pub fn from_binary(data: Bytes) -> Self {
        ClientMessage::Audio(data)
    }
}

/// Messages sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InitializationSuccess {
        status: String,
        session_id: String,
    },
    Transcription {
        transcription: String,
        is_end: bool,
        seq: u64,
    },
    InitializationError {
        error: String,
    },
    ServiceCreationError {
        error: String,
    },
    ConnectionError {
        error: String,
    },
    RuntimeError {
        error: String,
    },
    IdleTimeout {
        error: String,
    },
    Closed {
        reason: CloseReason,
    },
}

impl ServerMessage {
    pub fn connected(session_id: &str) -> Self {
        ServerMessage::InitializationSuccess {
            status: "connected".to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ServerMessage::InitializationError { .. }
                | ServerMessage::ServiceCreationError { .. }
                | ServerMessage::ConnectionError { .. }
                | ServerMessage::RuntimeError { .. }
                | ServerMessage::IdleTimeout { .. }
        )
    }
}
