//! Realtime transcription over WebSocket
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **init** (first message): `{"provider_id", "model", "language", "input_sample_rate", "input_encoding", "gen_config"}`
//! - **audio**: binary frames, or `{"audio": "<base64>"}`
//! - **close**: `{"type": "close"}`; pending transcripts are drained before the session ends
//!
//! ## Server → Client
//!
//! - **initialization_success**: session established
//! - **transcription**: `{"transcription", "is_end", "seq"}` in provider order
//! - **initialization_error** / **service_creation_error** / **connection_error**: fatal setup errors
//! - **runtime_error**: a bad message, or a fatal provider error
//! - **idle_timeout**: no activity in either direction
//! - **closed**: `{"reason"}`, sent before the close frame

mod handler;

pub use handler::transcription_ws_handler;
