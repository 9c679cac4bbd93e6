//! WebSocket transport for realtime transcription sessions.
//!
//! Frames are decoded into [`ClientMessage`]s and handed to the
//! [`RealtimeBridge`](crate::core::realtime::RealtimeBridge); its
//! [`ServerMessage`]s are serialized back as JSON text frames. The socket is
//! closed with the code implied by the session's close reason.

use axum::{
    Extension,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::auth::Auth;
use crate::core::realtime::{ClientMessage, CloseReason, ServerMessage};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Outbound messages buffered per session
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long to wait for queued messages to reach the client before closing.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET /ws/audio/transcription`
///
/// Upgrades the connection and runs one transcription session on it.
pub async fn transcription_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ip)| ip);
    info!(auth_id = ?auth.id, "Transcription WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_transcription_socket(socket, state, auth, client_ip))
}

async fn handle_transcription_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    auth: Auth,
    client_ip: Option<ClientIp>,
) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, auth_id = ?auth.id, "Transcription WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMessage>(CHANNEL_BUFFER_SIZE);
    let mut sender_task = tokio::spawn(forward_outbound(sender, outbound_rx));

    let inbound = Box::pin(async_stream::stream! {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => yield ClientMessage::from_text(text.as_str()),
                Ok(Message::Binary(data)) => yield Ok(ClientMessage::from_binary(data)),
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    debug!("Transcription WebSocket read error: {}", e);
                    break;
                }
            }
        }
    });

    // Dropping the bridge's sender lets the forwarding task finish.
    let outcome = state.bridge.run(session_id.clone(), inbound, outbound_tx).await;

    match timeout(FLUSH_TIMEOUT, &mut sender_task).await {
        Ok(Ok(Some(mut sender))) if outcome.reason != CloseReason::ClientDisconnected => {
            let frame = CloseFrame {
                code: outcome.close_code(),
                reason: outcome.reason.to_string().into(),
            };
            if let Err(e) = sender.send(Message::Close(Some(frame))).await {
                debug!(session_id = %session_id, "Failed to send close frame: {}", e);
            }
        }
        Ok(_) => {}
        Err(_) => {
            warn!(session_id = %session_id, "Timed out flushing messages to client");
            sender_task.abort();
        }
    }

    if let Some(ClientIp(ip)) = client_ip {
        state.release_connection(ip);
    }

    info!(
        session_id = %session_id,
        reason = %outcome.reason,
        fragments = outcome.fragments_sent,
        "Transcription WebSocket terminated"
    );
}

/// Serialize outbound messages onto the socket. Returns the sink when the
/// channel closes, or `None` if the client went away first.
async fn forward_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
) -> Option<SplitSink<WebSocket, Message>> {
    while let Some(message) = outbound.recv().await {
        if message.is_error() {
            debug!(message = ?message, "Sending error to client");
        }
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize outgoing message: {}", e);
                continue;
            }
        };
        if let Err(e) = sender.send(Message::Text(json.into())).await {
            debug!("Failed to send WebSocket message: {}", e);
            return None;
        }
    }
    Some(sender)
}
