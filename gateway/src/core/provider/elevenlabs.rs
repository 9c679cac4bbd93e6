//! ElevenLabs provider adapter (speech synthesis and transcription).
//!
//! Output formats follow the ElevenLabs `codec_samplerate[_bitrate]`
//! convention, e.g. `mp3_44100_128`, `pcm_24000` or `ulaw_8000`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use super::openai::{check_status, merge_gen_config};
use super::types::{
    SpeakRequest, SpeakResponse, TranscribeRequest, TranscribeResponse, mime_type_for,
};
use super::{
    Capability, ProviderAdapter, ProviderConfig, ProviderError, ProviderEvent, ProviderKind,
    ProviderResult, ProviderStream,
};

pub const ELEVENLABS_API_URL: &str = "https://api.elevenlabs.io";
pub const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ElevenLabsAdapter {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

/// Split an ElevenLabs output format into MIME type and sample rate.
pub fn decode_output_format(output_format: &str) -> ProviderResult<(&'static str, u32)> {
    let mut parts = output_format.split('_');
    let codec = parts.next().unwrap_or_default();
    let rate = parts.next().and_then(|r| r.parse::<u32>().ok());
    match (mime_type_for(codec), rate) {
        (Some(mime), Some(rate)) => Ok((mime, rate)),
        _ => Err(ProviderError::invalid_request(format!(
            "Unsupported output format: {output_format}"
        ))),
    }
}

impl ElevenLabsAdapter {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::auth("Missing API key for elevenlabs"));
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
                .unwrap_or(ELEVENLABS_API_URL)
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    async fn synthesize(
        &self,
        request: &SpeakRequest,
        stream: bool,
    ) -> ProviderResult<(reqwest::Response, &'static str, u32)> {
        let format = request
            .output_format
            .as_deref()
            .unwrap_or(DEFAULT_OUTPUT_FORMAT);
        let (mime, sample_rate) = decode_output_format(format)?;
        let suffix = if stream { "/stream" } else { "" };
        let url = format!(
            "{}/v1/text-to-speech/{}{}",
            self.base_url, request.voice, suffix
        );

        let mut body = json!({
            "text": request.text,
            "model_id": request.model,
        });
        merge_gen_config(&mut body, request.gen_config.as_ref());

        let response = self
            .client
            .post(url)
            .query(&[("output_format", format)])
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        Ok((check_status(response).await?, mime, sample_rate))
    }
}

#[async_trait]
impl ProviderAdapter for ElevenLabsAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ElevenLabs
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Speak | Capability::Transcribe)
    }

    async fn speak(&self, request: SpeakRequest) -> ProviderResult<SpeakResponse> {
        let (response, mime, sample_rate) = self.synthesize(&request, false).await?;
        Ok(SpeakResponse {
            audio: response.bytes().await?,
            content_type: mime.to_string(),
            sample_rate,
        })
    }

    async fn speak_stream(&self, request: SpeakRequest) -> ProviderResult<ProviderStream> {
        let (response, _, _) = self.synthesize(&request, true).await?;
        let stream = response
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
            .text("model_id", request.model.clone());
        if let Some(language) = request.language.as_deref().filter(|l| *l != "auto") {
            form = form.text("language_code", language.to_string());
        }

        let response = self
            .client
            .post(format!("{}/v1/speech-to-text", self.base_url))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;
        let value: Value = check_status(response).await?.json().await?;
        Ok(TranscribeResponse {
            text: value["text"].as_str().unwrap_or_default().to_string(),
            language: value["language_code"].as_str().map(str::to_string),
        })
    }
}
