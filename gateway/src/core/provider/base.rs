//! Capability interface implemented by every provider adapter.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::ProviderKind;
use super::types::{
    ChatRequest, ChatResponse, ProviderEvent, RealtimeTranscriptionConfig, SpeakRequest,
    SpeakResponse, TranscribeRequest, TranscribeResponse, TranscriptFragment,
};
use crate::core::audio::AudioFormat;

// =============================================================================
// Error Types
// =============================================================================

/// Broad category of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Auth,
    InvalidRequest,
    ProviderUnavailable,
    RateLimited,
    /// The adapter does not implement the requested capability.
    Unsupported,
    Unknown,
}

impl ErrorClass {
    /// Whether a failure of this class leaves room for another provider to succeed.
    pub fn default_retryable(&self) -> bool {
        !matches!(self, ErrorClass::InvalidRequest)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Auth => "auth",
            ErrorClass::InvalidRequest => "invalid_request",
            ErrorClass::ProviderUnavailable => "provider_unavailable",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Unsupported => "unsupported",
            ErrorClass::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Typed failure returned by any adapter call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{class}: {message}")]
pub struct ProviderError {
    pub class: ErrorClass,
    pub message: String,
    /// Safe to retry the same logical call on a different provider.
    pub retryable: bool,
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retryable: class.default_retryable(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvalidRequest, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::ProviderUnavailable, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::RateLimited, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unknown, message)
    }

    pub fn unsupported(capability: Capability) -> Self {
        Self::new(
            ErrorClass::Unsupported,
            format!("Operation '{capability}' is not supported by this provider"),
        )
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is_unsupported(&self) -> bool {
        self.class == ErrorClass::Unsupported
    }

    /// Classify a non-success HTTP response from a provider API.
    pub fn from_status(status: http::StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        match status.as_u16() {
            401 | 403 => Self::auth(message),
            404 => Self::invalid_request(message).with_retryable(true),
            400 | 422 => Self::invalid_request(message),
            408 => Self::unavailable(message),
            429 => Self::rate_limited(message),
            500..=599 => Self::unavailable(message),
            _ => Self::unknown(message),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status, "");
        }
        if err.is_decode() {
            return Self::unknown(format!("Failed to decode provider response: {err}"));
        }
        Self::unavailable(format!("Request failed: {err}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProviderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) => Self::from_status(response.status(), ""),
            other => Self::unavailable(format!("WebSocket error: {other}")),
        }
    }
}

// =============================================================================
// Capabilities
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Chat,
    Speak,
    Transcribe,
    RealtimeTranscribe,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Chat => write!(f, "chat"),
            Capability::Speak => write!(f, "speak"),
            Capability::Transcribe => write!(f, "transcribe"),
            Capability::RealtimeTranscribe => write!(f, "realtime_transcribe"),
        }
    }
}

/// Incremental provider output. Exhaustion of the stream is the end marker.
pub type ProviderStream = BoxStream<'static, ProviderResult<ProviderEvent>>;

/// Transcript fragments of a realtime session, in provider order.
pub type FragmentStream = BoxStream<'static, ProviderResult<TranscriptFragment>>;

// =============================================================================
// Realtime channel
// =============================================================================

/// Write half of a provider realtime session.
#[async_trait]
pub trait RealtimeAudioSink: Send {
    /// Forward one frame of audio in the channel's input format.
    async fn send_audio(&mut self, frame: Bytes) -> ProviderResult<()>;

    /// Signal that no more audio will follow. Fragments for audio already
    /// sent keep arriving on the fragment stream until the provider ends it.
    async fn finish(&mut self) -> ProviderResult<()>;
}

/// Duplex handle returned by [`ProviderAdapter::open_realtime`].
///
/// Dropping both halves releases the underlying connection.
pub struct RealtimeChannel {
    pub input_format: AudioFormat,
    pub audio: Box<dyn RealtimeAudioSink>,
    pub fragments: FragmentStream,
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("input_format", &self.input_format)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Adapter trait
// =============================================================================

/// A provider exposes some subset of the capabilities below. Anything it
/// does not implement resolves to an [`ErrorClass::Unsupported`] error.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn supports(&self, capability: Capability) -> bool;

    async fn chat(&self, _request: ChatRequest) -> ProviderResult<ChatResponse> {
        Err(ProviderError::unsupported(Capability::Chat))
    }

    async fn chat_stream(&self, _request: ChatRequest) -> ProviderResult<ProviderStream> {
        Err(ProviderError::unsupported(Capability::Chat))
    }

    async fn speak(&self, _request: SpeakRequest) -> ProviderResult<SpeakResponse> {
        Err(ProviderError::unsupported(Capability::Speak))
    }

    async fn speak_stream(&self, _request: SpeakRequest) -> ProviderResult<ProviderStream> {
        Err(ProviderError::unsupported(Capability::Speak))
    }

    async fn transcribe(&self, _request: TranscribeRequest) -> ProviderResult<TranscribeResponse> {
        Err(ProviderError::unsupported(Capability::Transcribe))
    }

    async fn open_realtime(
        &self,
        _config: RealtimeTranscriptionConfig,
    ) -> ProviderResult<RealtimeChannel> {
        Err(ProviderError::unsupported(Capability::RealtimeTranscribe))
    }

    /// Release pooled connections. Called once on registry teardown.
    async fn close(&self) {}
}
