use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::messages::{TranscribePayload, WsAction, WsRequest, WsResponse};
use crate::auth::Auth;
use crate::core::fallback::StreamingSuccess;
use crate::core::provider::AudioFile;
use crate::core::stream::StreamChunk;
use crate::errors::app_error::{AppError, AppResult};
use crate::handlers::{chat, speak, transcribe};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Maximum WebSocket message size (25 MB, room for base64 audio uploads)
const MAX_WS_MESSAGE_SIZE: usize = 25 * 1024 * 1024;

/// `GET /ws`
///
/// Upgrades the connection and serves action requests on it until the
/// client goes away.
pub async fn action_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ip)| ip);
    info!(auth_id = ?auth.id, "Action WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_MESSAGE_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_action_socket(socket, state, auth, client_ip))
}

async fn handle_action_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    auth: Auth,
    client_ip: Option<ClientIp>,
) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, auth_id = ?auth.id, "Action WebSocket connected");

    let mut handled: u64 = 0;
    'serve: while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                let reply = WsResponse::error(None, "Binary frames are not accepted on this endpoint");
                if send(&mut socket, &reply).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                debug!(connection_id = %connection_id, "Action WebSocket read error: {}", e);
                break;
            }
        };

        handled += 1;
        let mut replies = match WsRequest::from_text(text.as_str()) {
            Ok(request) => {
                debug!(connection_id = %connection_id, action = %request.action, "Handling action");
                dispatch(&state, request).await
            }
            Err(reply) => stream::once(future::ready(reply)).boxed(),
        };
        // Dropping `replies` early aborts any provider stream behind it.
        while let Some(reply) = replies.next().await {
            if send(&mut socket, &reply).await.is_err() {
                break 'serve;
            }
        }
    }

    if let Some(ClientIp(ip)) = client_ip {
        state.release_connection(ip);
    }
    info!(connection_id = %connection_id, requests = handled, "Action WebSocket terminated");
}

async fn send(socket: &mut WebSocket, reply: &WsResponse) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(reply) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize action reply: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}

/// Run one request. Single-shot actions produce exactly one reply; streamed
/// ones produce `streaming` replies followed by one `success` or `error`.
pub(crate) async fn dispatch(state: &AppState, request: WsRequest) -> BoxStream<'static, WsResponse> {
    let action = request.action;
    let result = match action {
        WsAction::AgentRun => match parse(request.payload) {
            Ok(body) => chat::run_chat(state, body).await.map(|output| single(action, json!(output))),
            Err(err) => Err(err),
        },
        WsAction::AgentRunStream => match parse(request.payload) {
            Ok(body) => chat::open_chat_stream(state, body)
                .await
                .map(|success| relay(action, success, Value::Null)),
            Err(err) => Err(err),
        },
        WsAction::AudioSpeak => match parse(request.payload) {
            Ok(body) => speak::run_speak(state, body).await.map(|(provider_id, speech)| {
                single(
                    action,
                    json!({
                        "provider_id": provider_id,
                        "audio": BASE64.encode(&speech.audio),
                        "content_type": speech.content_type,
                        "sample_rate": speech.sample_rate,
                    }),
                )
            }),
            Err(err) => Err(err),
        },
        WsAction::AudioSpeakStream => match parse(request.payload) {
            Ok(body) => speak::open_speak_stream(state, body)
                .await
                .map(|(success, content_type)| relay(action, success, json!(content_type))),
            Err(err) => Err(err),
        },
        WsAction::AudioTranscribe => match parse::<TranscribePayload>(request.payload) {
            Ok(payload) => match decode_audio(&payload) {
                Ok(file) => transcribe::run_transcribe(state, file, payload.plan)
                    .await
                    .map(|output| single(action, json!(output))),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        },
    };

    result.unwrap_or_else(|err| {
        debug!(action = %action, error = %err, "Action failed");
        single_reply(WsResponse::from_app_error(action, &err))
    })
}

fn parse<T: DeserializeOwned>(payload: Value) -> AppResult<T> {
    serde_json::from_value(payload).map_err(|e| AppError::BadRequest(format!("Invalid payload: {e}")))
}

fn decode_audio(payload: &TranscribePayload) -> AppResult<AudioFile> {
    let data = BASE64
        .decode(payload.audio.as_bytes())
        .map_err(|e| AppError::BadRequest(format!("Invalid base64 audio: {e}")))?;
    Ok(AudioFile {
        filename: payload.filename.clone(),
        content_type: payload.content_type.clone(),
        data: data.into(),
    })
}

fn single(action: WsAction, data: Value) -> BoxStream<'static, WsResponse> {
    single_reply(WsResponse::success(action, data))
}

fn single_reply(reply: WsResponse) -> BoxStream<'static, WsResponse> {
    stream::once(future::ready(reply)).boxed()
}

/// Map a committed stream onto replies. The terminal chunk becomes the final
/// `success` (with the provider id) or `error` reply.
fn relay(action: WsAction, success: StreamingSuccess, content_type: Value) -> BoxStream<'static, WsResponse> {
    let StreamingSuccess {
        provider_id, stream, ..
    } = success;
    stream
        .map(move |chunk| match chunk {
            StreamChunk::End => {
                let mut data = json!({ "provider_id": provider_id });
                if !content_type.is_null() {
                    data["content_type"] = content_type.clone();
                }
                WsResponse::success(action, data)
            }
            StreamChunk::Failure(err) => {
                warn!(action = %action, error = %err, "Streamed action failed after commit");
                let mut reply = WsResponse::error(Some(action), err.to_string());
                reply.data = serde_json::to_value(&err).unwrap_or_default();
                reply
            }
            chunk => WsResponse::streaming(action, serde_json::to_value(&chunk).unwrap_or_default()),
        })
        .boxed()
}
