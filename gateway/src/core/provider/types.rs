//! Normalized request and response types shared by every provider.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// =============================================================================
// Chat
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Provider-specific generation parameters merged into the outbound body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

// =============================================================================
// Speech synthesis
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub model: String,
    pub text: String,
    pub voice: String,
    /// Provider format string, e.g. `mp3`, `pcm` or `pcm_24000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct SpeakResponse {
    pub audio: Bytes,
    pub content_type: String,
    pub sample_rate: u32,
}

/// Map a short codec name to its MIME type.
pub fn mime_type_for(codec: &str) -> Option<&'static str> {
    match codec.to_ascii_lowercase().as_str() {
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "ogg" | "opus" => Some("audio/ogg"),
        "ulaw" | "mulaw" => Some("audio/basic"),
        "alaw" => Some("audio/x-alaw-basic"),
        "pcm" | "pcm16" => Some("audio/pcm"),
        "aac" => Some("audio/aac"),
        "flac" => Some("audio/flac"),
        _ => None,
    }
}

// =============================================================================
// Transcription
// =============================================================================

#[derive(Debug, Clone)]
pub struct AudioFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub model: String,
    pub file: AudioFile,
    pub language: Option<String>,
    pub gen_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

// =============================================================================
// Realtime transcription
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeTranscriptionConfig {
    pub model: String,
    /// `None` lets the provider detect the language.
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_config: Option<serde_json::Value>,
}

/// One transcription result from a realtime session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub text: String,
    pub is_final: bool,
}

impl TranscriptFragment {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Incremental output of a streaming provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta(String),
    Audio(Bytes),
    Transcript(TranscriptFragment),
    Usage(Usage),
}
