//! Realtime transcription session state.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::core::audio::AudioFormat;

/// Lifecycle of a transcription session.
///
/// ```text
/// Idle -> Initializing -> Streaming -> Closing -> Closed
///   \__________\_____________________________/^
/// ```
///
/// `Idle` and `Initializing` may jump straight to `Closed` when the client
/// breaks protocol or the provider cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Initializing,
    Streaming,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Initializing)
                | (Idle, Closed)
                | (Initializing, Streaming)
                | (Initializing, Closed)
                | (Streaming, Closing)
                | (Closing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Invalid audio payload: {0}")]
    InvalidAudio(String),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The client sent an explicit close message.
    ClientClosed,
    /// The client transport went away.
    ClientDisconnected,
    IdleTimeout,
    /// The provider ended its fragment stream.
    ProviderClosed,
    ProviderError,
    InitializationFailed,
    ServiceCreationFailed,
    ConnectionFailed,
}

impl CloseReason {
    /// WebSocket close code reported to the client.
    pub fn close_code(self) -> u16 {
        match self {
            CloseReason::InitializationFailed => 1003,
            CloseReason::ServiceCreationFailed
            | CloseReason::ConnectionFailed
            | CloseReason::ProviderError => 1011,
            _ => 1000,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::ClientDisconnected => "client_disconnected",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::ProviderClosed => "provider_closed",
            CloseReason::ProviderError => "provider_error",
            CloseReason::InitializationFailed => "initialization_failed",
            CloseReason::ServiceCreationFailed => "service_creation_failed",
            CloseReason::ConnectionFailed => "connection_failed",
        };
        f.write_str(name)
    }
}

/// Per-connection session bookkeeping.
#[derive(Debug)]
pub struct TranscriptionSession {
    id: String,
    state: SessionState,
    input_format: Option<AudioFormat>,
    provider_id: Option<String>,
    seq: u64,
}

impl TranscriptionSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Idle,
            input_format: None,
            provider_id: None,
            seq: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "Session state change");
        self.state = next;
        Ok(())
    }

    pub fn negotiate(&mut self, provider_id: &str, input_format: AudioFormat) {
        self.provider_id = Some(provider_id.to_string());
        self.input_format = Some(input_format);
    }

    pub fn input_format(&self) -> Option<AudioFormat> {
        self.input_format
    }

    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    /// Sequence number for the next outbound fragment, starting at zero.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    /// Number of fragments sent so far.
    pub fn fragments_sent(&self) -> u64 {
        self.seq
    }
}
