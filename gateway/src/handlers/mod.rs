//! HTTP and WebSocket request handlers
//!
//! - `actions` - Action WebSocket multiplexing chat and speech requests
//! - `api` - Health check endpoint
//! - `chat` - Chat completion, plain and streamed
//! - `fallback` - Plan bodies shared by the fallback endpoints
//! - `providers` - Provider configuration management
//! - `realtime` - Realtime transcription WebSocket
//! - `speak` - Text-to-speech, plain and streamed
//! - `transcribe` - Batch transcription

pub mod actions;
pub mod api;
pub mod chat;
pub mod fallback;
pub mod providers;
pub mod realtime;
pub mod speak;
pub mod transcribe;

pub use actions::action_ws_handler;
pub use realtime::transcription_ws_handler;
