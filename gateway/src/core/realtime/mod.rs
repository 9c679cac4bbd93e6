//! Realtime transcription sessions.
//!
//! A session accepts an initialization message, then audio in any supported
//! encoding, and relays transcript fragments back in provider order. See
//! [`RealtimeBridge`] for the lifecycle.

mod bridge;
mod messages;
mod session;

pub use bridge::{BridgeSettings, RealtimeBridge, SessionOutcome};
pub use messages::{ClientMessage, DEFAULT_INPUT_SAMPLE_RATE, InitMessage, ServerMessage};
pub use session::{CloseReason, SessionError, SessionState, TranscriptionSession};
