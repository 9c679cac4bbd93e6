//! OpenAI-compatible provider adapter.
//!
//! Covers the OpenAI API and Groq's OpenAI-compatible endpoint.
//!
//! # API Reference
//!
//! - Chat: `POST {base}/chat/completions` (SSE when streaming)
//! - Speech: `POST {base}/audio/speech` (PCM output is 24kHz)
//! - Transcription: `POST {base}/audio/transcriptions` (multipart)
//! - Realtime transcription: `wss://{host}/v1/realtime?intent=transcription`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::sse::SseDecoder;
use super::types::{
    ChatRequest, ChatResponse, ProviderEvent, RealtimeTranscriptionConfig, SpeakRequest,
    SpeakResponse, TranscribeRequest, TranscribeResponse, TranscriptFragment, Usage,
    mime_type_for,
};
use super::{
    Capability, ProviderAdapter, ProviderConfig, ProviderError, ProviderKind, ProviderResult,
    ProviderStream, RealtimeAudioSink, RealtimeChannel,
};
use crate::core::audio::AudioFormat;

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";

/// Sample rate of OpenAI PCM speech output and realtime input.
pub const OPENAI_PCM_SAMPLE_RATE: u32 = 24000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WS_CHANNEL_CAPACITY: usize = 256;
const COMMIT_EMPTY_CODE: &str = "input_audio_buffer_commit_empty";

// =============================================================================
// Adapter
// =============================================================================

pub struct OpenAIAdapter {
    kind: ProviderKind,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIAdapter {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        Self::build(ProviderKind::OpenAI, config, OPENAI_API_URL)
    }

    /// Groq exposes the same API shape under a different base URL.
    pub fn groq(config: &ProviderConfig) -> ProviderResult<Self> {
        Self::build(ProviderKind::Groq, config, GROQ_API_URL)
    }

    fn build(kind: ProviderKind, config: &ProviderConfig, default_url: &str) -> ProviderResult<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::auth(format!("Missing API key for {kind}")));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::unknown(format!("Failed to build HTTP client: {e}")))?;
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(default_url)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            kind,
            api_key: config.api_key.clone(),
            base_url,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn realtime_url(&self) -> ProviderResult<String> {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ProviderError::invalid_request(format!(
                "Unsupported base URL scheme: {}",
                self.base_url
            )));
        };
        Ok(format!("{ws_base}/realtime?intent=transcription"))
    }

    async fn post_json(&self, path: &str, body: &Value) -> ProviderResult<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }

    fn speech_body(request: &SpeakRequest) -> (Value, &str) {
        let format = request.output_format.as_deref().unwrap_or("mp3");
        let mut body = json!({
            "model": request.model,
            "input": request.text,
            "voice": request.voice,
            "response_format": format,
        });
        merge_gen_config(&mut body, request.gen_config.as_ref());
        (body, format)
    }
}

pub(crate) async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status, &body))
}

/// Copy top-level keys of `gen_config` into the request body.
pub(crate) fn merge_gen_config(body: &mut Value, gen_config: Option<&Value>) {
    if let (Some(target), Some(Value::Object(extra))) = (body.as_object_mut(), gen_config) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usage").filter(|u| u.is_object())?;
    Some(Usage {
        input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
    })
}

/// Translate one streamed chat completion chunk.
fn parse_chat_chunk(data: &str) -> ProviderResult<Vec<ProviderEvent>> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::unknown(format!("Malformed stream chunk: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = error["message"].as_str().unwrap_or("stream error");
        return Err(ProviderError::unknown(message.to_string()));
    }

    let mut events = Vec::new();
    if let Some(text) = value["choices"][0]["delta"]["content"].as_str() {
        if !text.is_empty() {
            events.push(ProviderEvent::TextDelta(text.to_string()));
        }
    }
    if let Some(usage) = parse_usage(&value) {
        events.push(ProviderEvent::Usage(usage));
    }
    Ok(events)
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::RealtimeTranscribe => self.kind == ProviderKind::OpenAI,
            _ => true,
        }
    }

    async fn chat(&self, request: ChatRequest) -> ProviderResult<ChatResponse> {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
        });
        merge_gen_config(&mut body, request.gen_config.as_ref());

        let value: Value = self.post_json("chat/completions", &body).await?.json().await?;
        let output = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::unknown("Response contained no message content"))?
            .to_string();
        Ok(ChatResponse {
            output,
            usage: parse_usage(&value),
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> ProviderResult<ProviderStream> {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        merge_gen_config(&mut body, request.gen_config.as_ref());

        let mut bytes = self.post_json("chat/completions", &body).await?.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(ProviderError::from)?;
                for data in decoder.push(&chunk) {
                    if data == "[DONE]" {
                        break 'read;
                    }
                    for event in parse_chat_chunk(&data)? {
                        yield event;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn speak(&self, request: SpeakRequest) -> ProviderResult<SpeakResponse> {
        let (body, format) = Self::speech_body(&request);
        let audio = self.post_json("audio/speech", &body).await?.bytes().await?;
        Ok(SpeakResponse {
            audio,
            content_type: mime_type_for(format)
                .unwrap_or("application/octet-stream")
                .to_string(),
            sample_rate: OPENAI_PCM_SAMPLE_RATE,
        })
    }

    async fn speak_stream(&self, request: SpeakRequest) -> ProviderResult<ProviderStream> {
        let (body, _) = Self::speech_body(&request);
        let stream = self
            .post_json("audio/speech", &body)
            .await?
            .bytes_stream()
            .map(|chunk| chunk.map(ProviderEvent::Audio).map_err(ProviderError::from));
        Ok(Box::pin(stream))
    }

    async fn transcribe(&self, request: TranscribeRequest) -> ProviderResult<TranscribeResponse> {
        let mut part = reqwest::multipart::Part::bytes(request.file.data.to_vec())
            .file_name(request.file.filename.clone());
        if let Some(content_type) = &request.file.content_type {
            part = part.mime_str(content_type).map_err(|e| {
                ProviderError::invalid_request(format!("Invalid file content type: {e}"))
            })?;
        }

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", request.model.clone());
        if let Some(language) = request.language.as_deref().filter(|l| *l != "auto") {
            form = form.text("language", language.to_string());
        }
        if let Some(Value::Object(extra)) = &request.gen_config {
            for (key, value) in extra {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                form = form.text(key.clone(), text);
            }
        }

        let response = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let value: Value = check_status(response).await?.json().await?;
        let text = value["text"]
            .as_str()
            .ok_or_else(|| ProviderError::unknown("Transcription response had no text"))?
            .to_string();
        Ok(TranscribeResponse {
            text,
            language: value["language"].as_str().map(str::to_string),
        })
    }

    async fn open_realtime(
        &self,
        config: RealtimeTranscriptionConfig,
    ) -> ProviderResult<RealtimeChannel> {
        if !self.supports(Capability::RealtimeTranscribe) {
            return Err(ProviderError::unsupported(Capability::RealtimeTranscribe));
        }

        let url = self.realtime_url()?;
        let mut request = url.as_str().into_client_request()?;
        let auth: http::HeaderValue = format!("Bearer {}", self.api_key)
            .parse()
            .map_err(|_| ProviderError::auth("API key is not a valid header value"))?;
        request.headers_mut().insert(http::header::AUTHORIZATION, auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", http::HeaderValue::from_static("realtime=v1"));

        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        tracing::info!(provider = %self.kind, model = %config.model, "Connected to realtime transcription");
        let (mut ws_sink, mut ws_stream) = ws.split();

        let mut session = json!({
            "input_audio_format": "pcm16",
            "input_audio_transcription": { "model": config.model },
            "turn_detection": { "type": "server_vad" },
        });
        if let Some(language) = config.language.as_deref().filter(|l| *l != "auto") {
            session["input_audio_transcription"]["language"] = json!(language);
        }
        merge_gen_config(&mut session, config.gen_config.as_ref());
        let update = json!({ "type": "transcription_session.update", "session": session });
        ws_sink.send(Message::text(update.to_string())).await?;

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(WS_CHANNEL_CAPACITY);
        let (fragment_tx, fragment_rx) =
            mpsc::channel::<ProviderResult<TranscriptFragment>>(WS_CHANNEL_CAPACITY);
        let finishing = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if ws_sink.send(message).await.is_err() {
                    return;
                }
            }
            let _ = ws_sink.send(Message::Close(None)).await;
        });

        let reader_finishing = finishing.clone();
        let reader = tokio::spawn(async move {
            let mut state = TranscriptionEventState::new(reader_finishing);
            while let Some(message) = ws_stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = fragment_tx.send(Err(ProviderError::from(e))).await;
                        break;
                    }
                };
                let Ok(event) = serde_json::from_str::<Value>(text.as_str()) else {
                    tracing::warn!("Ignoring malformed realtime event");
                    continue;
                };
                match state.apply(&event) {
                    EventOutcome::Fragment(fragment) => {
                        if fragment_tx.send(Ok(fragment)).await.is_err() {
                            break;
                        }
                    }
                    EventOutcome::Fatal(err) => {
                        let _ = fragment_tx.send(Err(err)).await;
                        break;
                    }
                    EventOutcome::Ignore => {}
                }
                if state.is_drained() {
                    tracing::debug!("Realtime transcription drained after finish");
                    break;
                }
            }
        });

        let tasks = Arc::new(TaskGuard(vec![writer, reader]));
        let fragments = futures::stream::unfold(
            (fragment_rx, tasks.clone()),
            |(mut rx, guard)| async move { rx.recv().await.map(|item| (item, (rx, guard))) },
        );

        Ok(RealtimeChannel {
            input_format: AudioFormat::pcm16(OPENAI_PCM_SAMPLE_RATE),
            audio: Box::new(OpenAIRealtimeSink {
                tx: out_tx,
                finishing,
                _tasks: tasks,
            }),
            fragments: Box::pin(fragments),
        })
    }
}

// =============================================================================
// Realtime helpers
// =============================================================================

/// Aborts the connection tasks once both halves of a channel are dropped.
struct TaskGuard(Vec<JoinHandle<()>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

struct OpenAIRealtimeSink {
    tx: mpsc::Sender<Message>,
    finishing: Arc<AtomicBool>,
    _tasks: Arc<TaskGuard>,
}

#[async_trait]
impl RealtimeAudioSink for OpenAIRealtimeSink {
    async fn send_audio(&mut self, frame: Bytes) -> ProviderResult<()> {
        let event = json!({
            "type": "input_audio_buffer.append",
            "audio": BASE64.encode(&frame),
        });
        self.tx
            .send(Message::text(event.to_string()))
            .await
            .map_err(|_| ProviderError::unavailable("Realtime connection closed"))
    }

    async fn finish(&mut self) -> ProviderResult<()> {
        if self.finishing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let commit = json!({ "type": "input_audio_buffer.commit" });
        self.tx
            .send(Message::text(commit.to_string()))
            .await
            .map_err(|_| ProviderError::unavailable("Realtime connection closed"))
    }
}

#[derive(Debug, PartialEq)]
enum EventOutcome {
    Fragment(TranscriptFragment),
    Fatal(ProviderError),
    Ignore,
}

/// Tracks committed audio items so the read loop can end once every
/// item committed before `finish` has been transcribed.
struct TranscriptionEventState {
    finishing: Arc<AtomicBool>,
    pending: usize,
    commit_acked: bool,
}

impl TranscriptionEventState {
    fn new(finishing: Arc<AtomicBool>) -> Self {
        Self {
            finishing,
            pending: 0,
            commit_acked: false,
        }
    }

    fn apply(&mut self, event: &Value) -> EventOutcome {
        let finishing = self.finishing.load(Ordering::SeqCst);
        match event["type"].as_str().unwrap_or_default() {
            "input_audio_buffer.committed" => {
                self.pending += 1;
                if finishing {
                    self.commit_acked = true;
                }
                EventOutcome::Ignore
            }
            "conversation.item.input_audio_transcription.delta" => {
                match event["delta"].as_str() {
                    Some(delta) if !delta.is_empty() => {
                        EventOutcome::Fragment(TranscriptFragment::partial(delta))
                    }
                    _ => EventOutcome::Ignore,
                }
            }
            "conversation.item.input_audio_transcription.completed" => {
                self.pending = self.pending.saturating_sub(1);
                let transcript = event["transcript"].as_str().unwrap_or_default();
                EventOutcome::Fragment(TranscriptFragment::final_text(transcript))
            }
            "conversation.item.input_audio_transcription.failed" => {
                self.pending = self.pending.saturating_sub(1);
                tracing::warn!(
                    error = %event["error"]["message"].as_str().unwrap_or("unknown"),
                    "Realtime transcription of an item failed"
                );
                EventOutcome::Ignore
            }
            "error" => {
                let code = event["error"]["code"].as_str().unwrap_or_default();
                if finishing && code == COMMIT_EMPTY_CODE {
                    self.commit_acked = true;
                    return EventOutcome::Ignore;
                }
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("realtime provider error");
                EventOutcome::Fatal(ProviderError::unknown(message.to_string()))
            }
            _ => EventOutcome::Ignore,
        }
    }

    fn is_drained(&self) -> bool {
        self.commit_acked && self.pending == 0
    }
}
