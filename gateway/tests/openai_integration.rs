//! Integration tests for the OpenAI-compatible adapter
//!
//! These tests verify, against a local mock server:
//! - Request shape for chat, speech and transcription
//! - SSE decoding for streamed chat
//! - HTTP status to error class mapping
//! - Groq sharing the adapter under its own base URL

use bytes::Bytes;
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use voxgate_gateway::core::provider::openai::GROQ_API_URL;
use voxgate_gateway::core::provider::{
    AudioFile, Capability, ChatMessage, ChatRequest, ErrorClass, OpenAIAdapter, ProviderAdapter,
    ProviderConfig, ProviderEvent, ProviderKind, SpeakRequest, TranscribeRequest, Usage,
};

fn adapter(server: &MockServer) -> OpenAIAdapter {
    let config = ProviderConfig::new(ProviderKind::OpenAI, "sk-test")
        .with_base_url(format!("{}/v1", server.uri()));
    OpenAIAdapter::new(&config).unwrap()
}

fn chat_request() -> ChatRequest {
    ChatRequest {
        model: "gpt-4o-mini".to_string(),
        messages: vec![ChatMessage::user("hello")],
        gen_config: Some(json!({"temperature": 0.2})),
    }
}

#[tokio::test]
async fn test_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "hello"}],
            "temperature": 0.2
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}],
            "usage": {"prompt_tokens": 4, "completion_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = adapter(&server).chat(chat_request()).await.unwrap();
    assert_eq!(response.output, "Hi there");
    assert_eq!(
        response.usage,
        Some(Usage {
            input_tokens: 4,
            output_tokens: 2
        })
    );
}

#[tokio::test]
async fn test_chat_stream_decodes_sse() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let stream = adapter(&server).chat_stream(chat_request()).await.unwrap();
    let events: Vec<ProviderEvent> = stream.map(|event| event.unwrap()).collect().await;

    assert_eq!(
        events,
        vec![
            ProviderEvent::TextDelta("Hel".to_string()),
            ProviderEvent::TextDelta("lo".to_string()),
            ProviderEvent::Usage(Usage {
                input_tokens: 3,
                output_tokens: 2
            }),
        ]
    );
}

#[tokio::test]
async fn test_chat_stream_error_event() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let mut stream = adapter(&server).chat_stream(chat_request()).await.unwrap();
    assert_eq!(
        stream.next().await.unwrap().unwrap(),
        ProviderEvent::TextDelta("Hi".to_string())
    );
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.message.contains("overloaded"));
}

#[tokio::test]
async fn test_speak_returns_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/speech"))
        .and(body_partial_json(json!({
            "model": "tts-1",
            "input": "Hello",
            "voice": "alloy",
            "response_format": "pcm"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4]))
        .mount(&server)
        .await;

    let response = adapter(&server)
        .speak(SpeakRequest {
            model: "tts-1".to_string(),
            text: "Hello".to_string(),
            voice: "alloy".to_string(),
            output_format: Some("pcm".to_string()),
            gen_config: None,
        })
        .await
        .unwrap();

    assert_eq!(response.audio, Bytes::from_static(&[1, 2, 3, 4]));
    assert_eq!(response.content_type, "audio/pcm");
    assert_eq!(response.sample_rate, 24000);
}

#[tokio::test]
async fn test_transcribe_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/audio/transcriptions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"text": "hello world", "language": "english"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = adapter(&server)
        .transcribe(TranscribeRequest {
            model: "whisper-1".to_string(),
            file: AudioFile {
                filename: "clip.wav".to_string(),
                content_type: Some("audio/wav".to_string()),
                data: Bytes::from_static(b"RIFF0000WAVE"),
            },
            language: Some("auto".to_string()),
            gen_config: None,
        })
        .await
        .unwrap();

    assert_eq!(response.text, "hello world");
    assert_eq!(response.language.as_deref(), Some("english"));

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"model\""));
    assert!(body.contains("whisper-1"));
    // "auto" leaves language detection to the provider
    assert!(!body.contains("name=\"language\""));
}

#[tokio::test]
async fn test_status_classification() {
    let server = MockServer::start().await;
    let adapter = adapter(&server);

    let cases = [
        (401, ErrorClass::Auth, false),
        (429, ErrorClass::RateLimited, true),
        (400, ErrorClass::InvalidRequest, false),
        (503, ErrorClass::ProviderUnavailable, true),
    ];
    for (status, class, retryable) in cases {
        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = adapter.chat(chat_request()).await.unwrap_err();
        assert_eq!(err.class, class, "status {status}");
        assert_eq!(err.retryable, retryable, "status {status}");
        assert!(err.message.contains("nope"));
    }
}

#[tokio::test]
async fn test_unreachable_provider_is_unavailable() {
    let config = ProviderConfig::new(ProviderKind::OpenAI, "sk-test")
        .with_base_url("http://127.0.0.1:9/v1");
    let adapter = OpenAIAdapter::new(&config).unwrap();

    let err = adapter.chat(chat_request()).await.unwrap_err();
    assert!(err.retryable);
}

#[test]
fn test_groq_defaults_and_capabilities() {
    let config = ProviderConfig::new(ProviderKind::Groq, "gsk-test");
    let groq = OpenAIAdapter::groq(&config).unwrap();

    assert_eq!(groq.kind(), ProviderKind::Groq);
    assert_eq!(groq.base_url(), GROQ_API_URL);
    assert!(groq.supports(Capability::Chat));
    assert!(!groq.supports(Capability::RealtimeTranscribe));
}

#[test]
fn test_missing_api_key_rejected() {
    let config = ProviderConfig::new(ProviderKind::OpenAI, "");
    let err = OpenAIAdapter::new(&config).err().unwrap();
    assert_eq!(err.class, ErrorClass::Auth);
}
