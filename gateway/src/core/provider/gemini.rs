//! Google Gemini provider adapter (chat only).
//!
//! # API Reference
//!
//! - Chat: `POST {base}/v1beta/models/{model}:generateContent`
//! - Streamed chat: `POST {base}/v1beta/models/{model}:streamGenerateContent?alt=sse`
//!
//! A leading `system` message becomes the `systemInstruction`; `assistant`
//! turns are sent with Gemini's `model` role. `gen_config` is passed through
//! as `generationConfig`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use super::openai::check_status;
use super::sse::SseDecoder;
use super::types::{ChatMessage, ChatRequest, ChatResponse, ProviderEvent, Usage};
use super::{
    Capability, ProviderAdapter, ProviderConfig, ProviderError, ProviderKind, ProviderResult,
    ProviderStream,
};

pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GeminiAdapter {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::auth("Missing API key for gemini"));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::unknown(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(GEMINI_API_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    async fn generate(&self, request: &ChatRequest, stream: bool) -> ProviderResult<reqwest::Response> {
        if request.model.is_empty() || request.model.contains('/') {
            return Err(ProviderError::invalid_request(format!(
                "Invalid Gemini model name: '{}'",
                request.model
            )));
        }
        let url = if stream {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, request.model
            )
        } else {
            format!("{}/v1beta/models/{}:generateContent", self.base_url, request.model)
        };
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .await?;
        check_status(response).await
    }
}

fn request_body(request: &ChatRequest) -> Value {
    let (system, messages) = match request.messages.split_first() {
        Some((first, rest)) if first.role == "system" => (Some(first), rest),
        _ => (None, request.messages.as_slice()),
    };

    let contents: Vec<Value> = messages.iter().map(content).collect();
    let mut body = json!({ "contents": contents });
    if let Some(system) = system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system.content }] });
    }
    if let Some(gen_config) = request.gen_config.as_ref().filter(|v| v.is_object()) {
        body["generationConfig"] = gen_config.clone();
    }
    body
}

fn content(message: &ChatMessage) -> Value {
    let role = match message.role.as_str() {
        "assistant" | "model" => "model",
        _ => "user",
    };
    json!({ "role": role, "parts": [{ "text": message.content }] })
}

/// Concatenated text of the first candidate, if it has any.
fn candidate_text(value: &Value) -> Option<String> {
    let parts = value["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    Some(text)
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usageMetadata").filter(|u| u.is_object())?;
    Some(Usage {
        input_tokens: usage["promptTokenCount"].as_u64().unwrap_or(0),
        output_tokens: usage["candidatesTokenCount"].as_u64().unwrap_or(0),
    })
}

/// Translate one streamed `GenerateContentResponse`.
///
/// Usage is reported cumulatively, so it is only forwarded with the final
/// chunk (the one carrying a `finishReason`).
fn parse_stream_chunk(data: &str) -> ProviderResult<Vec<ProviderEvent>> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::unknown(format!("Malformed stream chunk: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = error["message"].as_str().unwrap_or("stream error");
        return Err(ProviderError::unknown(message.to_string()));
    }

    let mut events = Vec::new();
    if let Some(text) = candidate_text(&value).filter(|t| !t.is_empty()) {
        events.push(ProviderEvent::TextDelta(text));
    }
    if value["candidates"][0].get("finishReason").is_some()
        && let Some(usage) = parse_usage(&value)
    {
        events.push(ProviderEvent::Usage(usage));
    }
    Ok(events)
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn supports(&self, capability: Capability) -> bool {
        capability == Capability::Chat
    }

    async fn chat(&self, request: ChatRequest) -> ProviderResult<ChatResponse> {
        let value: Value = self.generate(&request, false).await?.json().await?;
        if let Some(reason) = value["promptFeedback"]["blockReason"].as_str() {
            return Err(ProviderError::invalid_request(format!(
                "Prompt blocked by provider: {reason}"
            )));
        }
        let output = candidate_text(&value)
            .ok_or_else(|| ProviderError::unknown("Response contained no candidates"))?;
        tracing::debug!(model = %request.model, "Gemini chat completed");
        Ok(ChatResponse {
            output,
            usage: parse_usage(&value),
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> ProviderResult<ProviderStream> {
        let mut bytes = self.generate(&request, true).await?.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(ProviderError::from)?;
                for data in decoder.push(&chunk) {
                    for event in parse_stream_chunk(&data)? {
                        yield event;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
