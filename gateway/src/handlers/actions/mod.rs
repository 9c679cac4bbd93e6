//! Action WebSocket (`GET /ws`).
//!
//! One connection carries any number of requests, handled one at a time.
//! Each text frame is a request:
//!
//! ```json
//! {"action": "agent_run", "payload": {"requests": [...], "deadline_secs": 10}}
//! ```
//!
//! `payload` is the same plan body the matching REST endpoint takes.
//! `audio_transcribe` additionally carries the audio inline as base64 in
//! `audio` (with optional `filename` and `content_type`).
//!
//! Replies are JSON text frames `{"status", "action", "data", "error"?}`.
//! Single-shot actions answer with one `success` or `error`. Streamed actions
//! (`agent_run_stream`, `audio_speak_stream`) send a `streaming` reply per
//! chunk followed by exactly one `success` or `error`.

mod handler;
pub mod messages;

pub use handler::action_ws_handler;
pub use messages::{WsAction, WsRequest, WsResponse, WsStatus};
