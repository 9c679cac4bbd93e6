//! Stream multiplexer.
//!
//! [`StreamMultiplexer::wrap`] turns a provider's incremental output into a
//! [`ChunkStream`] of canonical [`StreamChunk`]s:
//!
//! - chunks keep provider order;
//! - exactly one terminal chunk ([`StreamChunk::End`] or
//!   [`StreamChunk::Failure`]) is produced, after which the stream is done;
//! - the read loop runs on its own task but pushes into a bounded channel,
//!   so a slow consumer slows the provider read down instead of growing a
//!   buffer;
//! - dropping the [`ChunkStream`] aborts the read loop and with it the
//!   provider connection.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::provider::{
    ErrorClass, ProviderError, ProviderEvent, ProviderStream, TranscriptFragment, Usage,
};

/// Default number of chunks buffered between the provider and the caller.
pub const DEFAULT_STREAM_BUFFER: usize = 32;

// =============================================================================
// Chunk types
// =============================================================================

/// One unit of streamed output as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    TextDelta {
        text: String,
    },
    AudioBytes {
        #[serde(serialize_with = "serialize_base64")]
        data: Bytes,
    },
    TranscriptFragment {
        text: String,
        is_final: bool,
    },
    UsageSummary {
        usage: Usage,
    },
    End,
    Failure(StreamCommitError),
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::End | StreamChunk::Failure(_))
    }
}

impl From<ProviderEvent> for StreamChunk {
    fn from(event: ProviderEvent) -> Self {
        match event {
            ProviderEvent::TextDelta(text) => StreamChunk::TextDelta { text },
            ProviderEvent::Audio(data) => StreamChunk::AudioBytes { data },
            ProviderEvent::Transcript(TranscriptFragment { text, is_final }) => {
                StreamChunk::TranscriptFragment { text, is_final }
            }
            ProviderEvent::Usage(usage) => StreamChunk::UsageSummary { usage },
        }
    }
}

fn serialize_base64<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(data))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitFailureKind {
    /// The provider reported an error.
    Provider,
    /// The provider went quiet for longer than the stall timeout.
    TimedOut,
    /// The caller's overall deadline elapsed.
    DeadlineExceeded,
    /// The read loop stopped without reporting an outcome.
    Interrupted,
}

/// Failure of a stream after output was already delivered to the caller.
/// Not retryable: the caller has observed partial output.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("stream from '{provider_id}' failed after output was delivered: {message}")]
pub struct StreamCommitError {
    pub provider_id: String,
    pub kind: CommitFailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
    pub message: String,
}

impl StreamCommitError {
    fn new(provider_id: &str, kind: CommitFailureKind, message: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            kind,
            class: None,
            message: message.into(),
        }
    }

    fn provider(provider_id: &str, err: ProviderError) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            kind: CommitFailureKind::Provider,
            class: Some(err.class),
            message: err.message,
        }
    }
}

// =============================================================================
// Multiplexer
// =============================================================================

#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    buffer: usize,
    stall_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl Default for StreamMultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_BUFFER)
    }
}

impl StreamMultiplexer {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            stall_timeout: None,
            deadline: None,
        }
    }

    /// Fail the stream if the provider produces nothing for `timeout`.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Fail the stream once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn wrap(&self, provider_id: &str, stream: ProviderStream) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.buffer);
        let pump = tokio::spawn(pump(
            provider_id.to_string(),
            stream,
            tx,
            self.stall_timeout,
            self.deadline,
        ));
        ChunkStream {
            provider_id: provider_id.to_string(),
            rx,
            pump,
            finished: false,
        }
    }
}

enum Next {
    Event(ProviderEvent),
    End,
    Failed(ProviderError),
    Stalled(Duration),
    DeadlineExceeded,
}

async fn next_event(
    stream: &mut ProviderStream,
    stall_timeout: Option<Duration>,
    deadline: Option<Instant>,
) -> Next {
    // A timeout too large to represent is the same as no timeout.
    let stall_at = stall_timeout.and_then(|d| Instant::now().checked_add(d));
    let limit = match (stall_at, deadline) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };

    let item = match limit {
        Some(at) => match tokio::time::timeout_at(at, stream.next()).await {
            Ok(item) => item,
            Err(_) => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return Next::DeadlineExceeded;
                }
                return Next::Stalled(stall_timeout.unwrap_or_default());
            }
        },
        None => stream.next().await,
    };

    match item {
        Some(Ok(event)) => Next::Event(event),
        Some(Err(err)) => Next::Failed(err),
        None => Next::End,
    }
}

async fn pump(
    provider_id: String,
    mut stream: ProviderStream,
    tx: mpsc::Sender<StreamChunk>,
    stall_timeout: Option<Duration>,
    deadline: Option<Instant>,
) {
    let mut forwarded: usize = 0;
    let terminal = loop {
        match next_event(&mut stream, stall_timeout, deadline).await {
            Next::Event(event) => {
                forwarded += 1;
                // Blocks while the channel is full.
                if tx.send(event.into()).await.is_err() {
                    tracing::debug!(provider_id = %provider_id, "Stream consumer went away");
                    return;
                }
            }
            Next::End => break StreamChunk::End,
            Next::Failed(err) => {
                tracing::warn!(provider_id = %provider_id, error = %err, "Provider stream failed after commit");
                break StreamChunk::Failure(StreamCommitError::provider(&provider_id, err));
            }
            Next::Stalled(after) => {
                tracing::warn!(provider_id = %provider_id, ?after, "Provider stream stalled");
                break StreamChunk::Failure(StreamCommitError::new(
                    &provider_id,
                    CommitFailureKind::TimedOut,
                    format!("no output for {after:?}"),
                ));
            }
            Next::DeadlineExceeded => {
                break StreamChunk::Failure(StreamCommitError::new(
                    &provider_id,
                    CommitFailureKind::DeadlineExceeded,
                    "overall deadline exceeded",
                ));
            }
        }
    };

    tracing::debug!(provider_id = %provider_id, forwarded, "Provider stream finished");
    let _ = tx.send(terminal).await;
}

// =============================================================================
// Chunk stream
// =============================================================================

/// Ordered, finite sequence of chunks from a single provider attempt.
///
/// Always ends with exactly one terminal chunk and then yields `None`.
#[derive(Debug)]
pub struct ChunkStream {
    provider_id: String,
    rx: mpsc::Receiver<StreamChunk>,
    pump: JoinHandle<()>,
    finished: bool,
}

impl ChunkStream {
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

impl Stream for ChunkStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                if chunk.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                self.finished = true;
                let failure = StreamCommitError::new(
                    &self.provider_id,
                    CommitFailureKind::Interrupted,
                    "stream ended without a terminal marker",
                );
                Poll::Ready(Some(StreamChunk::Failure(failure)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
