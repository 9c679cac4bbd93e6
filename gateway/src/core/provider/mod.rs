//! Provider adapters.
//!
//! Every backend implements [`ProviderAdapter`] for the capabilities it
//! offers. Adapters are built from a [`ProviderConfig`] by an
//! [`AdapterFactory`], normally [`default_adapter_factory`].
//!
//! # Supported Providers
//!
//! - **OpenAI** - chat, speech, transcription, realtime transcription
//! - **Groq** - OpenAI-compatible chat, speech and transcription
//! - **ElevenLabs** - speech and transcription
//! - **Gemini** - chat

mod base;
pub mod elevenlabs;
pub mod gemini;
pub mod openai;
mod sse;
pub mod types;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use zeroize::Zeroize;

pub use base::{
    Capability, ErrorClass, FragmentStream, ProviderAdapter, ProviderError, ProviderResult,
    ProviderStream, RealtimeAudioSink, RealtimeChannel,
};
pub use elevenlabs::ElevenLabsAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAIAdapter;
pub use types::{
    AudioFile, ChatMessage, ChatRequest, ChatResponse, ProviderEvent, RealtimeTranscriptionConfig,
    SpeakRequest, SpeakResponse, TranscribeRequest, TranscribeResponse, TranscriptFragment, Usage,
};

/// Supported provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderKind {
    OpenAI,
    Groq,
    ElevenLabs,
    Gemini,
}

impl ProviderKind {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAI),
            "groq" => Some(ProviderKind::Groq),
            "elevenlabs" | "eleven_labs" | "11labs" => Some(ProviderKind::ElevenLabs),
            "gemini" | "google" => Some(ProviderKind::Gemini),
            _ => None,
        }
    }

    pub fn all() -> [ProviderKind; 4] {
        [
            ProviderKind::OpenAI,
            ProviderKind::Groq,
            ProviderKind::ElevenLabs,
            ProviderKind::Gemini,
        ]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Groq => write!(f, "groq"),
            ProviderKind::ElevenLabs => write!(f, "elevenlabs"),
            ProviderKind::Gemini => write!(f, "gemini"),
        }
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ProviderKind::parse(&value).ok_or_else(|| {
            format!(
                "Unknown provider '{value}'. Supported providers: {:?}",
                ProviderKind::all().map(|k| k.to_string())
            )
        })
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.to_string()
    }
}

/// Settings for one configured provider instance.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Models this instance must never be used for.
    #[serde(default)]
    pub blacklist_models: Vec<String>,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: None,
            blacklist_models: Vec::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn is_model_allowed(&self, model: &str) -> bool {
        !self.blacklist_models.iter().any(|m| m == model)
    }

    /// API key with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let visible: String = self
            .api_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if self.api_key.chars().count() <= 4 {
            "****".to_string()
        } else {
            format!("****{visible}")
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.masked_api_key())
            .field("base_url", &self.base_url)
            .field("blacklist_models", &self.blacklist_models)
            .finish()
    }
}

impl Drop for ProviderConfig {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

/// Builds an adapter for a registry entry. Invoked at most once per id.
pub type AdapterFactory = Arc<
    dyn Fn(String, ProviderConfig) -> BoxFuture<'static, ProviderResult<Arc<dyn ProviderAdapter>>>
        + Send
        + Sync,
>;

/// Wrap an async constructor as an [`AdapterFactory`].
pub fn adapter_factory<F, Fut>(build: F) -> AdapterFactory
where
    F: Fn(String, ProviderConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProviderResult<Arc<dyn ProviderAdapter>>> + Send + 'static,
{
    Arc::new(move |id, config| build(id, config).boxed())
}

/// Factory that builds the HTTP/WebSocket adapters for each [`ProviderKind`].
pub fn default_adapter_factory() -> AdapterFactory {
    adapter_factory(|id, config| async move {
        tracing::debug!(provider_id = %id, provider = %config.provider, "Constructing provider adapter");
        let adapter: Arc<dyn ProviderAdapter> = match config.provider {
            ProviderKind::OpenAI => Arc::new(OpenAIAdapter::new(&config)?),
            ProviderKind::Groq => Arc::new(OpenAIAdapter::groq(&config)?),
            ProviderKind::ElevenLabs => Arc::new(ElevenLabsAdapter::new(&config)?),
            ProviderKind::Gemini => Arc::new(GeminiAdapter::new(&config)?),
        };
        Ok(adapter)
    })
}
