//! Transport-independent realtime transcription bridge.
//!
//! [`RealtimeBridge::run`] drives one session: it reads parsed client
//! messages from any stream, talks to the provider through its
//! [`RealtimeChannel`], and pushes [`ServerMessage`]s into a bounded channel
//! that the transport drains. The WebSocket handler is one such transport;
//! tests use in-memory channels.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, InitMessage, ServerMessage};
use super::session::{CloseReason, SessionError, SessionState, TranscriptionSession};
use crate::core::audio::{AudioNormalizer, DEFAULT_FRAME_MS};
use crate::core::provider::{
    Capability, FragmentStream, ProviderError, ProviderResult, RealtimeAudioSink,
    RealtimeChannel, TranscriptFragment,
};
use crate::core::registry::ProviderRegistry;

/// Timeouts and framing for realtime sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Close the session when neither side has produced anything for this long.
    pub idle_timeout: Duration,
    /// How long to wait for the initialization message.
    pub init_timeout: Duration,
    /// How long to keep relaying fragments after the client closes.
    pub drain_timeout: Duration,
    pub connect_timeout: Duration,
    pub frame_ms: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            init_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(15),
            frame_ms: DEFAULT_FRAME_MS,
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub reason: CloseReason,
    pub fragments_sent: u64,
}

impl SessionOutcome {
    pub fn close_code(&self) -> u16 {
        self.reason.close_code()
    }
}

#[derive(Clone)]
pub struct RealtimeBridge {
    registry: Arc<ProviderRegistry>,
    settings: BridgeSettings,
}

impl RealtimeBridge {
    pub fn new(registry: Arc<ProviderRegistry>, settings: BridgeSettings) -> Self {
        Self { registry, settings }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Run one session to completion.
    ///
    /// Returns once the session reaches `Closed`. The provider channel is
    /// released before this returns; `outbound` receives a final
    /// [`ServerMessage::Closed`] unless the client already went away.
    pub async fn run<S>(
        &self,
        session_id: String,
        mut inbound: S,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> SessionOutcome
    where
        S: Stream<Item = Result<ClientMessage, SessionError>> + Unpin + Send,
    {
        let mut session = TranscriptionSession::new(session_id);
        debug!(session_id = %session.id(), "Realtime session started");

        let reason = match self.initialize(&mut session, &mut inbound, &outbound).await {
            Ok((channel, normalizer)) => {
                self.stream(&mut session, &mut inbound, channel, normalizer, &outbound)
                    .await
            }
            Err(reason) => reason,
        };

        if session.state() != SessionState::Closed {
            advance(&mut session, SessionState::Closed);
        }
        if reason != CloseReason::ClientDisconnected {
            let _ = outbound.send(ServerMessage::Closed { reason }).await;
        }

        info!(
            session_id = %session.id(),
            provider_id = session.provider_id().unwrap_or("-"),
            reason = %reason,
            fragments = session.fragments_sent(),
            "Realtime session closed"
        );
        SessionOutcome {
            session_id: session.id().to_string(),
            reason,
            fragments_sent: session.fragments_sent(),
        }
    }

    /// Idle -> Initializing -> Streaming. Any failure ends in `Closed`.
    async fn initialize<S>(
        &self,
        session: &mut TranscriptionSession,
        inbound: &mut S,
        outbound: &mpsc::Sender<ServerMessage>,
    ) -> Result<(RealtimeChannel, AudioNormalizer), CloseReason>
    where
        S: Stream<Item = Result<ClientMessage, SessionError>> + Unpin + Send,
    {
        let init: InitMessage =
            match tokio::time::timeout(self.settings.init_timeout, inbound.next()).await {
                Ok(Some(Ok(ClientMessage::Init(init)))) => init,
                Ok(Some(Ok(_))) => {
                    return Err(reject(
                        session,
                        outbound,
                        ServerMessage::InitializationError {
                            error: "First message must be an initialization payload".to_string(),
                        },
                        CloseReason::InitializationFailed,
                    )
                    .await);
                }
                Ok(Some(Err(err))) => {
                    return Err(reject(
                        session,
                        outbound,
                        ServerMessage::InitializationError {
                            error: err.to_string(),
                        },
                        CloseReason::InitializationFailed,
                    )
                    .await);
                }
                Ok(None) => {
                    advance(session, SessionState::Closed);
                    return Err(CloseReason::ClientDisconnected);
                }
                Err(_) => {
                    return Err(reject(
                        session,
                        outbound,
                        ServerMessage::InitializationError {
                            error: "Timed out waiting for initialization message".to_string(),
                        },
                        CloseReason::InitializationFailed,
                    )
                    .await);
                }
            };

        advance(session, SessionState::Initializing);
        let input_format = init.input_format();
        if let Err(err) = input_format.validate() {
            return Err(reject(
                session,
                outbound,
                ServerMessage::InitializationError {
                    error: format!("Invalid initialization request: {err}"),
                },
                CloseReason::InitializationFailed,
            )
            .await);
        }
        session.negotiate(&init.provider_id, input_format);
        info!(
            session_id = %session.id(),
            provider_id = %init.provider_id,
            model = %init.model,
            sample_rate = input_format.sample_rate,
            encoding = %input_format.encoding,
            "Initializing realtime session"
        );

        let provider = match self.registry.resolve(&init.provider_id).await {
            Ok(provider) => provider,
            Err(err) => {
                return Err(reject(
                    session,
                    outbound,
                    ServerMessage::ServiceCreationError {
                        error: format!("Failed to create transcription service: {err}"),
                    },
                    CloseReason::ServiceCreationFailed,
                )
                .await);
            }
        };
        let usable = provider.check_model(&init.model).and_then(|()| {
            if provider.adapter().supports(Capability::RealtimeTranscribe) {
                Ok(())
            } else {
                Err(ProviderError::unsupported(
                    Capability::RealtimeTranscribe,
                ))
            }
        });
        if let Err(err) = usable {
            return Err(reject(
                session,
                outbound,
                ServerMessage::ServiceCreationError {
                    error: format!("Failed to create transcription service: {err}"),
                },
                CloseReason::ServiceCreationFailed,
            )
            .await);
        }

        let opened = tokio::time::timeout(
            self.settings.connect_timeout,
            provider.adapter().open_realtime(init.transcription_config()),
        )
        .await;
        let channel = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(err)) => {
                return Err(reject(
                    session,
                    outbound,
                    ServerMessage::ConnectionError {
                        error: format!("Failed to connect to transcription provider: {err}"),
                    },
                    CloseReason::ConnectionFailed,
                )
                .await);
            }
            Err(_) => {
                return Err(reject(
                    session,
                    outbound,
                    ServerMessage::ConnectionError {
                        error: format!(
                            "Failed to connect to transcription provider: timed out after {}s",
                            self.settings.connect_timeout.as_secs()
                        ),
                    },
                    CloseReason::ConnectionFailed,
                )
                .await);
            }
        };

        let normalizer =
            match AudioNormalizer::new(input_format, channel.input_format, self.settings.frame_ms) {
                Ok(normalizer) => normalizer,
                Err(err) => {
                    return Err(reject(
                        session,
                        outbound,
                        ServerMessage::ConnectionError {
                            error: format!("Provider audio format is not usable: {err}"),
                        },
                        CloseReason::ConnectionFailed,
                    )
                    .await);
                }
            };

        advance(session, SessionState::Streaming);
        let _ = outbound.send(ServerMessage::connected(session.id())).await;
        info!(session_id = %session.id(), "Realtime session streaming");
        Ok((channel, normalizer))
    }

    /// Streaming -> Closing. Returns why the session is closing.
    ///
    /// Provider-bound audio goes through an [`Uplink`] task, so a provider
    /// that is slow to accept audio never holds up fragment relay or the
    /// idle timer.
    async fn stream<S>(
        &self,
        session: &mut TranscriptionSession,
        inbound: &mut S,
        channel: RealtimeChannel,
        normalizer: AudioNormalizer,
        outbound: &mpsc::Sender<ServerMessage>,
    ) -> CloseReason
    where
        S: Stream<Item = Result<ClientMessage, SessionError>> + Unpin + Send,
    {
        let RealtimeChannel {
            audio,
            mut fragments,
            ..
        } = channel;
        let (uplink_tx, uplink_rx) = mpsc::channel(UPLINK_BUFFER);
        let mut uplink = Uplink::spawn(session.id().to_string(), audio, normalizer, uplink_rx);
        // Audio the uplink queue had no room for. Inbound reads pause until it is queued.
        let mut pending: Option<UplinkCommand> = None;

        let idle_timeout = self.settings.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        let reason = loop {
            tokio::select! {
                message = inbound.next(), if pending.is_none() => {
                    idle.as_mut().reset(idle_deadline(idle_timeout));
                    match message {
                        Some(Ok(ClientMessage::Audio(data))) => {
                            match uplink_tx.try_send(UplinkCommand::Audio(data)) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(command)) => {
                                    debug!(session_id = %session.id(), "Provider uplink is behind, holding client audio");
                                    pending = Some(command);
                                }
                                // The uplink already exited; its result is picked up below.
                                Err(mpsc::error::TrySendError::Closed(_)) => {}
                            }
                        }
                        Some(Ok(ClientMessage::Close)) => {
                            info!(session_id = %session.id(), "Client requested close");
                            break CloseReason::ClientClosed;
                        }
                        Some(Ok(ClientMessage::Init(_))) => {
                            warn!(session_id = %session.id(), "Ignoring repeated initialization message");
                            let _ = outbound
                                .send(ServerMessage::RuntimeError {
                                    error: "Session is already initialized".to_string(),
                                })
                                .await;
                        }
                        Some(Err(err)) => {
                            warn!(session_id = %session.id(), error = %err, "Invalid client message");
                            let _ = outbound
                                .send(ServerMessage::RuntimeError { error: err.to_string() })
                                .await;
                        }
                        None => {
                            info!(session_id = %session.id(), "Client disconnected");
                            break CloseReason::ClientDisconnected;
                        }
                    }
                }
                permit = uplink_tx.reserve(), if pending.is_some() => {
                    if let (Ok(permit), Some(command)) = (permit, pending.take()) {
                        permit.send(command);
                    }
                }
                result = uplink.join(), if uplink.is_running() => {
                    if let Err(err) = result {
                        error!(session_id = %session.id(), error = %err, "Failed to forward audio to provider");
                        let _ = outbound
                            .send(ServerMessage::RuntimeError { error: err.to_string() })
                            .await;
                        break CloseReason::ProviderError;
                    }
                }
                fragment = fragments.next() => {
                    idle.as_mut().reset(idle_deadline(idle_timeout));
                    match fragment {
                        Some(Ok(fragment)) => {
                            if !relay(session, outbound, fragment).await {
                                break CloseReason::ClientDisconnected;
                            }
                        }
                        Some(Err(err)) => {
                            error!(session_id = %session.id(), error = %err, "Provider realtime error");
                            let _ = outbound
                                .send(ServerMessage::RuntimeError { error: err.to_string() })
                                .await;
                            break CloseReason::ProviderError;
                        }
                        None => {
                            info!(session_id = %session.id(), "Provider ended the transcription stream");
                            break CloseReason::ProviderClosed;
                        }
                    }
                }
                () = &mut idle => {
                    warn!(
                        session_id = %session.id(),
                        idle_secs = idle_timeout.as_secs(),
                        "Realtime session idle, closing"
                    );
                    let _ = outbound
                        .send(ServerMessage::IdleTimeout {
                            error: "Connection closed due to inactivity".to_string(),
                        })
                        .await;
                    break CloseReason::IdleTimeout;
                }
            }
        };

        advance(session, SessionState::Closing);
        if matches!(reason, CloseReason::ClientClosed | CloseReason::IdleTimeout) {
            self.drain(session, uplink_tx, pending, &mut uplink, &mut fragments, outbound)
                .await;
        }
        reason
    }

    /// Queue any held audio and the finish command, then relay whatever the
    /// provider still produces. Bounded by the drain timeout.
    async fn drain(
        &self,
        session: &mut TranscriptionSession,
        uplink_tx: mpsc::Sender<UplinkCommand>,
        pending: Option<UplinkCommand>,
        uplink: &mut Uplink,
        fragments: &mut FragmentStream,
        outbound: &mpsc::Sender<ServerMessage>,
    ) {
        let finish = async move {
            for command in pending.into_iter().chain(std::iter::once(UplinkCommand::Finish)) {
                if uplink_tx.send(command).await.is_err() {
                    break;
                }
            }
        };
        tokio::pin!(finish);
        let mut queued = false;

        let drained = tokio::time::timeout(self.settings.drain_timeout, async {
            loop {
                tokio::select! {
                    () = &mut finish, if !queued => queued = true,
                    result = uplink.join(), if uplink.is_running() => {
                        if let Err(err) = result {
                            warn!(session_id = %session.id(), error = %err, "Failed to finish provider input");
                            return;
                        }
                    }
                    fragment = fragments.next() => match fragment {
                        Some(Ok(fragment)) => {
                            if !relay(session, outbound, fragment).await {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(session_id = %session.id(), error = %err, "Provider error while draining");
                            return;
                        }
                        None => return,
                    },
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(session_id = %session.id(), "Drain timed out, dropping pending fragments");
        }
    }
}

/// Work queued for the provider-bound half of a session.
enum UplinkCommand {
    Audio(Bytes),
    /// Flush buffered samples and end the provider's input.
    Finish,
}

/// Commands queued between the session loop and its uplink task.
const UPLINK_BUFFER: usize = 64;

/// Task that owns the provider sink and the audio normalizer.
///
/// Aborted on drop, which releases the sink.
struct Uplink {
    handle: JoinHandle<ProviderResult<()>>,
    running: bool,
}

impl Uplink {
    fn spawn(
        session_id: String,
        audio: Box<dyn RealtimeAudioSink>,
        normalizer: AudioNormalizer,
        commands: mpsc::Receiver<UplinkCommand>,
    ) -> Self {
        Self {
            handle: tokio::spawn(run_uplink(session_id, audio, normalizer, commands)),
            running: true,
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }

    /// Wait for the task to end. Only call while [`Uplink::is_running`].
    async fn join(&mut self) -> ProviderResult<()> {
        let result = (&mut self.handle).await;
        self.running = false;
        result.unwrap_or_else(|err| Err(ProviderError::unknown(format!("audio uplink failed: {err}"))))
    }
}

impl Drop for Uplink {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_uplink(
    session_id: String,
    mut audio: Box<dyn RealtimeAudioSink>,
    mut normalizer: AudioNormalizer,
    mut commands: mpsc::Receiver<UplinkCommand>,
) -> ProviderResult<()> {
    while let Some(command) = commands.recv().await {
        match command {
            UplinkCommand::Audio(data) => {
                for frame in normalizer.push(&data) {
                    audio.send_audio(frame).await?;
                }
            }
            UplinkCommand::Finish => {
                if let Some(frame) = normalizer.flush()
                    && let Err(err) = audio.send_audio(frame).await
                {
                    warn!(session_id = %session_id, error = %err, "Failed to flush trailing audio");
                }
                audio.finish().await?;
                debug!(session_id = %session_id, "Provider input finished");
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Next idle expiry. A timeout past the clock's range never fires.
fn idle_deadline(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 60 * 60))
}

fn advance(session: &mut TranscriptionSession, next: SessionState) {
    if let Err(err) = session.transition(next) {
        error!(session_id = %session.id(), error = %err, "Unexpected session transition");
    }
}

/// Report a setup failure and close the session.
async fn reject(
    session: &mut TranscriptionSession,
    outbound: &mpsc::Sender<ServerMessage>,
    message: ServerMessage,
    reason: CloseReason,
) -> CloseReason {
    warn!(session_id = %session.id(), reason = %reason, message = ?message, "Realtime session rejected");
    let _ = outbound.send(message).await;
    advance(session, SessionState::Closed);
    reason
}

/// Send one fragment to the client. Returns false once the client is gone.
async fn relay(
    session: &mut TranscriptionSession,
    outbound: &mpsc::Sender<ServerMessage>,
    fragment: TranscriptFragment,
) -> bool {
    let seq = session.next_seq();
    debug!(session_id = %session.id(), seq, is_final = fragment.is_final, "Relaying transcript fragment");
    outbound
        .send(ServerMessage::Transcription {
            transcription: fragment.text,
            is_end: fragment.is_final,
            seq,
        })
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{AudioEncoding, AudioFormat};
    use crate::core::provider::{
        ProviderAdapter, ProviderConfig, ProviderError, ProviderKind, ProviderResult,
        RealtimeTranscriptionConfig, adapter_factory,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::channel::mpsc as client_mpsc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Bytes>>,
        finished: AtomicBool,
        opened: AtomicUsize,
    }

    /// Realtime adapter that emits a fixed script of fragments on its own
    /// schedule, then `tail` once the input is finished.
    struct ScriptedRealtime {
        script: Vec<TranscriptFragment>,
        tail: Vec<TranscriptFragment>,
        fail_open: bool,
        fail_stream: bool,
        /// Accept the first frame, then never return from `send_audio`.
        stall_input: bool,
        pace: Duration,
        recorder: Arc<Recorder>,
    }

    struct RecordingSink {
        recorder: Arc<Recorder>,
        finished: Arc<Notify>,
        stall: bool,
    }

    #[async_trait]
    impl RealtimeAudioSink for RecordingSink {
        async fn send_audio(&mut self, frame: Bytes) -> ProviderResult<()> {
            self.recorder.frames.lock().unwrap().push(frame);
            if self.stall {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn finish(&mut self) -> ProviderResult<()> {
            self.recorder.finished.store(true, Ordering::SeqCst);
            self.finished.notify_one();
            Ok(())
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedRealtime {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAI
        }

        fn supports(&self, capability: Capability) -> bool {
            capability == Capability::RealtimeTranscribe
        }

        async fn open_realtime(
            &self,
            _config: RealtimeTranscriptionConfig,
        ) -> ProviderResult<RealtimeChannel> {
            self.recorder.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(ProviderError::unavailable("connection refused"));
            }
            let finished = Arc::new(Notify::new());
            let script = self.script.clone();
            let tail = self.tail.clone();
            let fail_stream = self.fail_stream;
            let pace = self.pace;
            let notified = finished.clone();
            let fragments: FragmentStream = Box::pin(async_stream::stream! {
                for fragment in script {
                    tokio::time::sleep(pace).await;
                    yield Ok(fragment);
                }
                if fail_stream {
                    yield Err(ProviderError::unknown("server_error"));
                }
                notified.notified().await;
                for fragment in tail {
                    yield Ok(fragment);
                }
            });
            Ok(RealtimeChannel {
                input_format: AudioFormat::pcm16(16000),
                audio: Box::new(RecordingSink {
                    recorder: self.recorder.clone(),
                    finished,
                    stall: self.stall_input,
                }),
                fragments,
            })
        }
    }

    fn scripted(script: Vec<TranscriptFragment>, tail: Vec<TranscriptFragment>) -> ScriptedRealtime {
        ScriptedRealtime {
            script,
            tail,
            fail_open: false,
            fail_stream: false,
            stall_input: false,
            pace: Duration::from_millis(5),
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn bridge_for(adapter: ScriptedRealtime, settings: BridgeSettings) -> (RealtimeBridge, Arc<Recorder>) {
        let recorder = adapter.recorder.clone();
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(adapter);
        let factory = adapter_factory(move |_id, _config| {
            let adapter = adapter.clone();
            async move { Ok(adapter) }
        });
        let registry = ProviderRegistry::new(factory);
        registry
            .register("rt", ProviderConfig::new(ProviderKind::OpenAI, "sk-test"))
            .unwrap();
        (RealtimeBridge::new(Arc::new(registry), settings), recorder)
    }

    fn init(provider_id: &str, rate: u32, encoding: &str) -> ClientMessage {
        ClientMessage::from_text(&format!(
            r#"{{"provider_id":"{provider_id}","model":"gpt-4o-transcribe","input_sample_rate":{rate},"input_encoding":"{encoding}"}}"#
        ))
        .unwrap()
    }

    struct Client {
        tx: client_mpsc::UnboundedSender<Result<ClientMessage, SessionError>>,
        rx: mpsc::Receiver<ServerMessage>,
        task: tokio::task::JoinHandle<SessionOutcome>,
    }

    impl Client {
        fn start(bridge: RealtimeBridge) -> Self {
            let (tx, inbound) = client_mpsc::unbounded();
            let (outbound, rx) = mpsc::channel(64);
            let task = tokio::spawn(async move {
                bridge.run("session-1".to_string(), inbound, outbound).await
            });
            Self { tx, rx, task }
        }

        fn send(&self, message: ClientMessage) {
            self.tx.unbounded_send(Ok(message)).unwrap();
        }

        async fn recv(&mut self) -> ServerMessage {
            tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for server message")
                .expect("server channel closed")
        }

        async fn finish(self) -> (SessionOutcome, Vec<ServerMessage>) {
            let Client { tx, mut rx, task } = self;
            let outcome = task.await.unwrap();
            drop(tx);
            let mut rest = Vec::new();
            while let Ok(message) = rx.try_recv() {
                rest.push(message);
            }
            (outcome, rest)
        }
    }

    fn transcripts(messages: &[ServerMessage]) -> Vec<(String, bool, u64)> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Transcription {
                    transcription,
                    is_end,
                    seq,
                } => Some((transcription.clone(), *is_end, *seq)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_audio_before_init_is_rejected() {
        let (bridge, recorder) = bridge_for(scripted(vec![], vec![]), BridgeSettings::default());
        let client = Client::start(bridge);
        client.send(ClientMessage::from_text(r#"{"audio":"AAAA"}"#).unwrap());

        let (outcome, messages) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::InitializationFailed);
        assert_eq!(outcome.close_code(), 1003);
        assert_eq!(outcome.fragments_sent, 0);
        assert!(matches!(
            messages[0],
            ServerMessage::InitializationError { .. }
        ));
        assert_eq!(
            messages[1],
            ServerMessage::Closed {
                reason: CloseReason::InitializationFailed
            }
        );
        assert!(transcripts(&messages).is_empty());
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fragments_relayed_in_order() {
        let (bridge, _recorder) = bridge_for(
            scripted(
                vec![
                    TranscriptFragment::partial("He"),
                    TranscriptFragment::partial("llo"),
                    TranscriptFragment::final_text("world"),
                ],
                vec![],
            ),
            BridgeSettings::default(),
        );
        let mut client = Client::start(bridge);
        client.send(init("rt", 16000, "pcm16"));
        assert_eq!(
            client.recv().await,
            ServerMessage::connected("session-1")
        );

        // Audio interleaves freely with fragment delivery.
        client.send(ClientMessage::Audio(Bytes::from(vec![0u8; 640])));
        let mut received = Vec::new();
        while received.len() < 3 {
            received.push(client.recv().await);
            client.send(ClientMessage::Audio(Bytes::from(vec![0u8; 320])));
        }
        client.send(ClientMessage::Close);

        let (outcome, rest) = client.finish().await;
        assert_eq!(
            transcripts(&received),
            vec![
                ("He".to_string(), false, 0),
                ("llo".to_string(), false, 1),
                ("world".to_string(), true, 2),
            ]
        );
        assert_eq!(outcome.reason, CloseReason::ClientClosed);
        assert_eq!(outcome.fragments_sent, 3);
        assert_eq!(
            rest.last(),
            Some(&ServerMessage::Closed {
                reason: CloseReason::ClientClosed
            })
        );
    }

    #[tokio::test]
    async fn test_close_drains_in_flight_fragments() {
        let (bridge, recorder) = bridge_for(
            scripted(vec![], vec![TranscriptFragment::final_text("tail")]),
            BridgeSettings::default(),
        );
        let mut client = Client::start(bridge);
        client.send(init("rt", 8000, "mulaw"));
        assert!(matches!(
            client.recv().await,
            ServerMessage::InitializationSuccess { .. }
        ));

        // 20 ms of μ-law silence at 8 kHz becomes 20 ms of PCM16 at 16 kHz.
        client.send(ClientMessage::Audio(Bytes::from(vec![0xFFu8; 160])));
        client.send(ClientMessage::Close);

        let (outcome, messages) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::ClientClosed);
        assert!(recorder.finished.load(Ordering::SeqCst));
        assert_eq!(transcripts(&messages), vec![("tail".to_string(), true, 0)]);
        assert_eq!(
            messages.last(),
            Some(&ServerMessage::Closed {
                reason: CloseReason::ClientClosed
            })
        );

        let frames = recorder.frames.lock().unwrap();
        let total: usize = frames.iter().map(|f| f.len()).sum();
        assert!(frames.iter().all(|f| f.len() % 2 == 0));
        assert!(total.abs_diff(640) <= 4, "forwarded {total} bytes");
        // Silence stays silence after decoding and resampling.
        assert!(frames.iter().flat_map(|f| f.iter()).all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_stalled_provider_input_does_not_block_fragments() {
        let mut adapter = scripted(
            vec![
                TranscriptFragment::partial("He"),
                TranscriptFragment::partial("llo"),
                TranscriptFragment::final_text("world"),
            ],
            vec![],
        );
        adapter.stall_input = true;
        adapter.pace = Duration::from_millis(30);
        let settings = BridgeSettings {
            drain_timeout: Duration::from_millis(100),
            ..BridgeSettings::default()
        };
        let (bridge, recorder) = bridge_for(adapter, settings);
        let mut client = Client::start(bridge);
        client.send(init("rt", 16000, "pcm16"));
        assert_eq!(client.recv().await, ServerMessage::connected("session-1"));

        // One 20 ms frame; the provider takes it and then never returns.
        client.send(ClientMessage::Audio(Bytes::from(vec![0u8; 640])));
        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(client.recv().await);
        }
        assert_eq!(
            transcripts(&received),
            vec![
                ("He".to_string(), false, 0),
                ("llo".to_string(), false, 1),
                ("world".to_string(), true, 2),
            ]
        );
        assert_eq!(recorder.frames.lock().unwrap().len(), 1);

        client.send(ClientMessage::Close);
        let (outcome, rest) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::ClientClosed);
        assert!(!recorder.finished.load(Ordering::SeqCst));
        assert_eq!(
            rest.last(),
            Some(&ServerMessage::Closed {
                reason: CloseReason::ClientClosed
            })
        );
    }

    #[tokio::test]
    async fn test_unsupported_sample_rate_is_rejected() {
        let (bridge, recorder) = bridge_for(scripted(vec![], vec![]), BridgeSettings::default());
        let client = Client::start(bridge);
        client.send(init("rt", 1, "pcm16"));

        let (outcome, messages) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::InitializationFailed);
        match &messages[0] {
            ServerMessage::InitializationError { error } => {
                assert!(error.contains("sample rate"), "{error}");
            }
            other => panic!("expected initialization error, got {other:?}"),
        }
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_open_failure() {
        let mut adapter = scripted(vec![], vec![]);
        adapter.fail_open = true;
        let (bridge, _recorder) = bridge_for(adapter, BridgeSettings::default());
        let client = Client::start(bridge);
        client.send(init("rt", 24000, "pcm16"));

        let (outcome, messages) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::ConnectionFailed);
        assert_eq!(outcome.close_code(), 1011);
        assert!(matches!(messages[0], ServerMessage::ConnectionError { .. }));
        assert!(
            !messages
                .iter()
                .any(|m| matches!(m, ServerMessage::InitializationSuccess { .. }))
        );
    }

    #[tokio::test]
    async fn test_unknown_provider_is_service_creation_error() {
        let (bridge, _recorder) = bridge_for(scripted(vec![], vec![]), BridgeSettings::default());
        let client = Client::start(bridge);
        client.send(init("missing", 24000, "pcm16"));

        let (outcome, messages) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::ServiceCreationFailed);
        assert!(matches!(
            messages[0],
            ServerMessage::ServiceCreationError { .. }
        ));
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_session() {
        let settings = BridgeSettings {
            idle_timeout: Duration::from_millis(50),
            ..BridgeSettings::default()
        };
        let (bridge, recorder) = bridge_for(scripted(vec![], vec![]), settings);
        let mut client = Client::start(bridge);
        client.send(init("rt", 24000, "pcm16"));
        assert!(matches!(
            client.recv().await,
            ServerMessage::InitializationSuccess { .. }
        ));

        assert!(matches!(client.recv().await, ServerMessage::IdleTimeout { .. }));
        let (outcome, _) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::IdleTimeout);
        assert!(recorder.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_provider_error_is_fatal() {
        let mut adapter = scripted(vec![TranscriptFragment::partial("par")], vec![]);
        adapter.fail_stream = true;
        let (bridge, _recorder) = bridge_for(adapter, BridgeSettings::default());
        let client = Client::start(bridge);
        client.send(init("rt", 24000, "pcm16"));

        let (outcome, messages) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::ProviderError);
        assert_eq!(transcripts(&messages).len(), 1);
        assert!(
            messages
                .iter()
                .any(|m| matches!(m, ServerMessage::RuntimeError { .. }))
        );
    }

    #[tokio::test]
    async fn test_invalid_message_while_streaming_is_not_fatal() {
        let (bridge, _recorder) = bridge_for(scripted(vec![], vec![]), BridgeSettings::default());
        let mut client = Client::start(bridge);
        client.send(init("rt", 24000, "pcm16"));
        client.recv().await;

        client
            .tx
            .unbounded_send(Err(SessionError::InvalidAudio("bad".to_string())))
            .unwrap();
        assert!(matches!(client.recv().await, ServerMessage::RuntimeError { .. }));
        client.send(ClientMessage::Close);

        let (outcome, _) = client.finish().await;
        assert_eq!(outcome.reason, CloseReason::ClientClosed);
    }

    #[test]
    fn test_encoding_names_used_by_init() {
        assert_eq!(
            serde_json::from_str::<AudioEncoding>("\"alaw\"").unwrap(),
            AudioEncoding::Alaw
        );
    }
}
