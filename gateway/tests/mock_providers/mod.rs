//! Scripted provider adapters for router-level tests.
//!
//! Each provider id is mapped to a [`Behavior`]; the adapter factory builds a
//! [`MockAdapter`] that follows it for every capability and records which
//! providers were called.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use voxgate_gateway::ServerConfig;
use voxgate_gateway::config::{FallbackSettings, ProviderEntry, RealtimeSettings};
use voxgate_gateway::core::audio::AudioFormat;
use voxgate_gateway::core::provider::{
    AdapterFactory, Capability, ChatRequest, ChatResponse, ProviderAdapter, ProviderConfig,
    ProviderError, ProviderEvent, ProviderKind, ProviderResult, ProviderStream,
    RealtimeAudioSink, RealtimeChannel, RealtimeTranscriptionConfig, SpeakRequest, SpeakResponse,
    TranscribeRequest, TranscribeResponse, TranscriptFragment, Usage, adapter_factory,
};

#[derive(Clone, Debug)]
pub enum Behavior {
    /// Succeed with this text (chat output, audio bytes or transcript).
    Reply(String),
    Fail(ProviderError),
    /// Never complete.
    Hang,
    /// Stream these parts, then end.
    Stream(Vec<String>),
    /// Stream these parts, then fail.
    StreamThenFail(Vec<String>, ProviderError),
    /// Realtime only: one partial fragment per audio frame, a final
    /// fragment once input is finished.
    Echo,
}

/// Log of provider ids in the order their adapters were called.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct MockAdapter {
    id: String,
    behavior: Behavior,
    calls: CallLog,
}

impl MockAdapter {
    async fn run<T>(&self, ok: impl FnOnce(String) -> T) -> ProviderResult<T> {
        self.calls.lock().push(self.id.clone());
        match &self.behavior {
            Behavior::Reply(text) => Ok(ok(text.clone())),
            Behavior::Stream(parts) | Behavior::StreamThenFail(parts, _) => Ok(ok(parts.concat())),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Echo => Err(ProviderError::unavailable("realtime only")),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::unknown("unreachable"))
            }
        }
    }

    async fn stream(&self, event: fn(String) -> ProviderEvent) -> ProviderResult<ProviderStream> {
        self.calls.lock().push(self.id.clone());
        let (parts, tail) = match &self.behavior {
            Behavior::Reply(text) => (vec![text.clone()], None),
            Behavior::Stream(parts) => (parts.clone(), None),
            Behavior::StreamThenFail(parts, err) => (parts.clone(), Some(err.clone())),
            Behavior::Fail(err) => return Err(err.clone()),
            Behavior::Echo => return Err(ProviderError::unavailable("realtime only")),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(ProviderError::unknown("unreachable"));
            }
        };
        let stream = async_stream::stream! {
            for part in parts {
                yield Ok(event(part));
            }
            if let Some(err) = tail {
                yield Err(err);
            }
        };
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn supports(&self, capability: Capability) -> bool {
        capability != Capability::RealtimeTranscribe || matches!(self.behavior, Behavior::Echo)
    }

    async fn chat(&self, _request: ChatRequest) -> ProviderResult<ChatResponse> {
        self.run(|output| ChatResponse {
            output,
            usage: Some(Usage {
                input_tokens: 3,
                output_tokens: 5,
            }),
        })
        .await
    }

    async fn chat_stream(&self, _request: ChatRequest) -> ProviderResult<ProviderStream> {
        self.stream(ProviderEvent::TextDelta).await
    }

    async fn speak(&self, _request: SpeakRequest) -> ProviderResult<SpeakResponse> {
        self.run(|text| SpeakResponse {
            audio: Bytes::from(text),
            content_type: "audio/pcm".to_string(),
            sample_rate: 16000,
        })
        .await
    }

    async fn speak_stream(&self, _request: SpeakRequest) -> ProviderResult<ProviderStream> {
        self.stream(|part| ProviderEvent::Audio(Bytes::from(part))).await
    }

    async fn transcribe(&self, request: TranscribeRequest) -> ProviderResult<TranscribeResponse> {
        let size = request.file.data.len();
        self.run(|text| TranscribeResponse {
            text: format!("{text} ({size} bytes)"),
            language: Some("en".to_string()),
        })
        .await
    }

    async fn open_realtime(
        &self,
        _config: RealtimeTranscriptionConfig,
    ) -> ProviderResult<RealtimeChannel> {
        self.calls.lock().push(self.id.clone());
        if !matches!(self.behavior, Behavior::Echo) {
            return Err(ProviderError::unsupported(Capability::RealtimeTranscribe));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Option<usize>>();
        let fragments = async_stream::stream! {
            let mut frames = 0;
            while let Some(item) = rx.recv().await {
                match item {
                    Some(len) => {
                        frames += 1;
                        yield Ok::<_, ProviderError>(TranscriptFragment::partial(format!("frame {frames} ({len} bytes)")));
                    }
                    None => {
                        yield Ok::<_, ProviderError>(TranscriptFragment::final_text(format!("{frames} frames")));
                        break;
                    }
                }
            }
        };
        Ok(RealtimeChannel {
            input_format: AudioFormat::pcm16(ECHO_SAMPLE_RATE),
            audio: Box::new(EchoSink { tx }),
            fragments: Box::pin(fragments),
        })
    }
}

/// Sample rate requested by [`Behavior::Echo`] providers.
pub const ECHO_SAMPLE_RATE: u32 = 16000;

struct EchoSink {
    tx: mpsc::UnboundedSender<Option<usize>>,
}

#[async_trait]
impl RealtimeAudioSink for EchoSink {
    async fn send_audio(&mut self, frame: Bytes) -> ProviderResult<()> {
        self.tx
            .send(Some(frame.len()))
            .map_err(|_| ProviderError::unavailable("echo closed"))
    }

    async fn finish(&mut self) -> ProviderResult<()> {
        self.tx
            .send(None)
            .map_err(|_| ProviderError::unavailable("echo closed"))
    }
}

/// Behaviors by provider id plus the shared call log.
#[derive(Default)]
pub struct MockProviders {
    behaviors: HashMap<String, Behavior>,
    pub calls: CallLog,
}

impl MockProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(id.to_string(), behavior);
        self
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.behaviors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Factory building a [`MockAdapter`] for each configured id. Unknown ids
    /// get an adapter that reports the provider as unavailable.
    pub fn factory(&self) -> AdapterFactory {
        let behaviors = self.behaviors.clone();
        let calls = self.calls.clone();
        adapter_factory(move |id: String, _config: ProviderConfig| {
            let behavior = behaviors
                .get(&id)
                .cloned()
                .unwrap_or_else(|| Behavior::Fail(ProviderError::unavailable("no mock")));
            let calls = calls.clone();
            async move {
                let adapter: Arc<dyn ProviderAdapter> = Arc::new(MockAdapter {
                    id,
                    behavior,
                    calls,
                });
                Ok(adapter)
            }
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

/// Minimal configuration registering `ids` as providers, with auth disabled.
pub fn create_test_config(ids: &[String]) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 8000,
        tls: None,
        providers: ids
            .iter()
            .map(|id| ProviderEntry {
                id: id.clone(),
                config: ProviderConfig::new(ProviderKind::OpenAI, "test-key"),
            })
            .collect(),
        auth_api_secrets: Vec::new(),
        auth_required: false,
        cors_allowed_origins: Some("*".to_string()),
        rate_limit_requests_per_second: 100000, // Disable for tests
        rate_limit_burst_size: 100,
        max_websocket_connections: None,
        max_connections_per_ip: 1000,
        fallback: FallbackSettings::default(),
        realtime: RealtimeSettings::default(),
    }
}
