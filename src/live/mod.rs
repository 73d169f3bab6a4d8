//! Realtime session orchestration
//!
//! [`Session`] is the synchronous core: it owns the transcript, the token
//! ledger, playback and speech handles, and the outbound sink while a
//! connection is active. Every mutation funnels through it, so the merge
//! rules and accounting live in one place and stay testable without a
//! socket. [`LiveClient`] is the async shell that owns the microphone and
//! the channels, translating commands, transport events, and fallback
//! updates into `Session` calls from a single task.

pub mod protocol;
pub mod transcript;
pub mod transport;
pub mod usage;

use std::time::{Duration, Instant};

use base64::Engine;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;

use crate::audio::{AudioCapture, Player, meter_level};
use crate::fallback::{self, FallbackRequest, FallbackUpdate};
use crate::pcm::{self, BASE64};
use crate::speech::SpeechQueue;
use crate::tools::ToolRegistry;
use protocol::{
    ClientMessage, Content, FunctionResponse, GenerationConfig, ServerMessage, Setup, SpeechConfig,
    Tool, ToolCall,
};
use transcript::{LogEntry, Speaker, TranscriptLog};
use transport::{LiveEndpoint, OutboundSink, TransportEvent};
use usage::{TokenCosts, TokenLedger, UsageStats};

/// Default realtime model
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.0-flash-live-001";

/// Default model for the streaming text fallback
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.0-flash";

/// Default prebuilt voice for spoken replies
pub const DEFAULT_VOICE: &str = "Puck";

/// Baseline persona shared by the realtime session and the fallback path
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Spyglass, a voice assistant with an \
    optional view of the user's screen. Keep spoken replies short and conversational. Use the \
    provided tools for anything involving projects or tasks instead of guessing. Never describe \
    on-screen content you have not actually been shown.";

const SCREEN_STARTED_NOTE: &str =
    "System: screen sharing started. Video frames of the user's screen will follow.";
const SCREEN_PAUSED_NOTE: &str =
    "System: screen sharing paused. No further frames will arrive until it resumes.";
const SCREEN_RESUMED_NOTE: &str = "System: screen sharing resumed. Video frames will follow again.";

/// Samples per uplink audio chunk (128 ms at the 16 kHz capture rate)
pub const CAPTURE_BLOCK_SAMPLES: usize = 2048;

/// How often the capture buffer is drained into wire chunks
const CAPTURE_POLL: Duration = Duration::from_millis(50);

/// How often usage stats are re-emitted so the per-minute rate decays
const STATS_PERIOD: Duration = Duration::from_secs(1);

/// How often volume meters are refreshed
const VOLUME_PERIOD: Duration = Duration::from_millis(200);

/// Connection lifecycle. `Error` is terminal until the next connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Error,
}

/// Instructions for the client task.
#[derive(Debug, Clone)]
pub enum Command {
    Connect,
    Disconnect,
    /// A typed message; always routed through the fallback path
    SendText(String),
    /// One JPEG-encoded frame of the shared screen
    SendVideoFrame(Vec<u8>),
    ScreenShareStarted,
    VideoStateChanged {
        paused: bool,
    },
    SetMuted(bool),
    Shutdown,
}

/// State changes surfaced to the frontend.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    /// Emitted once per active session teardown
    Disconnected,
    Error {
        message: String,
    },
    /// A new or updated transcript entry
    Transcript(LogEntry),
    Stats(UsageStats),
    Volume {
        input: f32,
        output: f32,
    },
}

/// Everything a session needs to know before dialing.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub live_model: String,
    pub fallback_model: String,
    pub fallback_base: String,
    pub api_key: SecretString,
    pub voice: String,
    pub system_instruction: String,
    pub costs: TokenCosts,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            live_model: DEFAULT_LIVE_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            fallback_base: fallback::DEFAULT_GENERATE_BASE.to_string(),
            api_key: SecretString::from(String::new()),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            costs: TokenCosts::default(),
        }
    }
}

/// Synchronous session core. Holds the outbound sink only while a
/// connection is active; taking it is the first step of every teardown,
/// so capture blocks racing a disconnect are dropped, not queued.
pub struct Session {
    settings: SessionSettings,
    transcript: TranscriptLog,
    ledger: TokenLedger,
    player: Player,
    speech: SpeechQueue,
    registry: ToolRegistry,
    sink: Option<OutboundSink>,
    state: ConnectionState,
    muted: bool,
    /// Most recent screen frame, kept for fallback requests
    last_frame: Option<Vec<u8>>,
    /// True only after an explicit pause; a feed that never started
    /// reads as still syncing, not as paused
    video_paused: bool,
    /// Whether this turn has seen any user speech yet
    turn_has_input: bool,
    /// Set when the first input transcription of a turn arrives, taken
    /// when the first model audio lands
    response_pending: Option<Instant>,
    /// Measured first-audio latency for the turn in flight
    response_latency_ms: Option<u64>,
    input_level: f32,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Session {
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        player: Player,
        speech: SpeechQueue,
        registry: ToolRegistry,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let ledger = TokenLedger::new(settings.costs.window);
        Self {
            settings,
            transcript: TranscriptLog::new(),
            ledger,
            player,
            speech,
            registry,
            sink: None,
            state: ConnectionState::Idle,
            muted: false,
            last_frame: None,
            video_paused: false,
            turn_has_input: false,
            response_pending: None,
            response_latency_ms: None,
            input_level: 0.0,
            events,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    #[must_use]
    pub const fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    #[must_use]
    pub const fn player(&self) -> &Player {
        &self.player
    }

    #[must_use]
    pub const fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn speech(&self) -> &SpeechQueue {
        &self.speech
    }

    /// The setup frame for a new connection: audio-only replies in the
    /// configured voice, transcription on for both directions, and the
    /// task tools advertised.
    #[must_use]
    pub fn setup(&self) -> Setup {
        Setup {
            model: format!("models/{}", self.settings.live_model),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig::voice(self.settings.voice.clone())),
            }),
            system_instruction: Some(Content::text(&self.settings.system_instruction)),
            tools: vec![Tool {
                function_declarations: self.registry.declarations(),
            }],
            input_audio_transcription: Some(json!({})),
            output_audio_transcription: Some(json!({})),
        }
    }

    /// Enter `Connecting` and reset per-connection accounting.
    pub fn begin_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
        self.ledger.reset();
        self.transcript.reset_accumulators();
        self.turn_has_input = false;
        self.response_pending = None;
        self.response_latency_ms = None;
    }

    /// Adopt a live sink and report the connection.
    pub fn activate(&mut self, sink: OutboundSink) {
        self.sink = Some(sink);
        self.state = ConnectionState::Connected;
        self.emit(ClientEvent::Connected);
    }

    /// Report a fatal error and tear down into the `Error` state.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "session failed");
        self.emit(ClientEvent::Error { message });
        self.teardown(ConnectionState::Error);
    }

    /// Tear down into `Idle`; a no-op apart from state when nothing is up.
    pub fn disconnect(&mut self) {
        self.teardown(ConnectionState::Idle);
    }

    fn teardown(&mut self, next: ConnectionState) {
        let was_active = self.sink.take().is_some();
        self.player.stop_all();
        self.speech.cancel_pending();
        self.turn_has_input = false;
        self.response_pending = None;
        self.response_latency_ms = None;
        self.state = next;
        if was_active {
            self.emit(ClientEvent::Disconnected);
        }
    }

    /// Stop the playback thread. Called once on shutdown.
    pub fn shutdown_audio(&self) {
        self.player.shutdown();
    }

    /// Account for and forward one captured audio block. Blocks arriving
    /// after teardown or while muted are dropped; the meter still moves
    /// so the UI shows the microphone is alive.
    pub fn handle_capture_block(&mut self, samples: &[f32], sample_rate: u32) {
        self.input_level = meter_level(samples);
        let Some(sink) = &self.sink else {
            return;
        };
        if self.muted {
            return;
        }
        let payload = pcm::encode(samples);
        let tokens = self.settings.costs.audio_tokens(samples.len(), sample_rate);
        self.ledger.record(tokens, Instant::now());
        sink.send(ClientMessage::realtime_audio(sample_rate, payload));
    }

    /// Apply one inbound frame.
    pub fn handle_server(&mut self, message: ServerMessage) {
        if let Some(error) = message.error {
            let code = error.code.map(|c| format!(" ({c})")).unwrap_or_default();
            let detail = error
                .message
                .unwrap_or_else(|| "unspecified server error".to_string());
            self.fail(format!("server error{code}: {detail}"));
            return;
        }
        if message.setup_complete.is_some() {
            tracing::debug!("setup acknowledged");
        }
        if let Some(tool_call) = message.tool_call {
            self.handle_tool_call(tool_call);
        }
        let Some(content) = message.server_content else {
            return;
        };

        let input_delta = content
            .input_transcription
            .as_ref()
            .map(|t| t.text.clone())
            .filter(|t| !t.is_empty());

        // The first user speech of a turn starts the latency clock
        if input_delta.is_some() && !self.turn_has_input {
            self.turn_has_input = true;
            self.response_pending = Some(Instant::now());
        }

        if let Some(turn) = &content.model_turn {
            for part in &turn.parts {
                let Some(blob) = &part.inline_data else {
                    continue;
                };
                if !blob.mime_type.starts_with("audio/") {
                    continue;
                }
                if let Some(started) = self.response_pending.take() {
                    #[allow(clippy::cast_possible_truncation)]
                    let latency = started.elapsed().as_millis() as u64;
                    self.response_latency_ms = Some(latency);
                    // Surface the reply entry before its transcription text
                    let entry = self.transcript.preview_output(Some(latency));
                    self.emit(ClientEvent::Transcript(entry));
                }
                match pcm::decode_base64(&blob.data) {
                    Ok(samples) => {
                        let rate = protocol::mime_rate(&blob.mime_type);
                        if let Err(e) = self.player.schedule(&samples, rate) {
                            tracing::warn!(error = %e, "dropping audio chunk");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "undecodable audio chunk"),
                }
            }
        }

        if content.interrupted {
            tracing::debug!("generation interrupted");
            self.player.stop_all();
            self.speech.cancel_pending();
            self.response_pending = None;
        }

        if let Some(output) = &content.output_transcription {
            if !output.text.is_empty() {
                let entry = self
                    .transcript
                    .append_output(&output.text, self.response_latency_ms);
                self.emit(ClientEvent::Transcript(entry));
            }
        }

        if let Some(delta) = input_delta {
            let entry = self.transcript.append_input(&delta);
            self.emit(ClientEvent::Transcript(entry));
        }

        if content.turn_complete {
            self.ledger.note_turn();
            let chars = self.transcript.output_len();
            if chars > 0 {
                self.ledger
                    .record(self.settings.costs.tokens_for_chars(chars), Instant::now());
            }
            if let Some(entry) = self.transcript.finalize_input() {
                self.emit(ClientEvent::Transcript(entry));
            }
            let latency = self.response_latency_ms.take();
            if let Some(entry) = self.transcript.finalize_output(latency) {
                self.emit(ClientEvent::Transcript(entry));
            }
            self.turn_has_input = false;
            self.response_pending = None;
        }
    }

    /// Execute every requested tool and answer with one batched response.
    fn handle_tool_call(&mut self, tool_call: ToolCall) {
        let mut responses = Vec::with_capacity(tool_call.function_calls.len());
        for call in tool_call.function_calls {
            let args = call.args.clone().unwrap_or_else(|| json!({}));
            let result = self.registry.execute(&call.name, &args);
            let entry = self.transcript.push_final(
                Speaker::System,
                format!("Tool {}: {result}", call.name),
                None,
            );
            self.emit(ClientEvent::Transcript(entry));
            responses.push(FunctionResponse {
                id: call.id,
                name: call.name,
                response: json!({ "result": result }),
            });
        }
        if let Some(sink) = &self.sink {
            sink.send(ClientMessage::tool_responses(responses));
        }
    }

    /// Prepare a typed message for the fallback path. Interrupts any
    /// audio still playing, flushes a reply still streaming, records the
    /// user entry and its cost, and snapshots everything the request
    /// task needs. Returns `None` for whitespace-only input.
    pub fn send_text(&mut self, text: &str) -> Option<FallbackRequest> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.player.stop_all();
        self.speech.cancel_pending();
        if let Some(entry) = self.transcript.finalize_output(None) {
            self.emit(ClientEvent::Transcript(entry));
        }
        let entry = self.transcript.push_final(Speaker::User, text, None);
        self.emit(ClientEvent::Transcript(entry));

        let now = Instant::now();
        self.ledger.record(self.settings.costs.text_tokens(text), now);
        let frame = self.last_frame.clone();
        if frame.is_some() {
            self.ledger.record(self.settings.costs.image_tokens, now);
            self.ledger.note_image();
        }
        Some(FallbackRequest {
            base_url: self.settings.fallback_base.clone(),
            api_key: self.settings.api_key.clone(),
            model: self.settings.fallback_model.clone(),
            text: text.to_string(),
            frame,
            video_paused: self.video_paused,
            system_instruction: self.settings.system_instruction.clone(),
            declarations: self.registry.declarations(),
        })
    }

    /// Apply one progress update from a fallback request.
    pub fn handle_fallback(&mut self, update: FallbackUpdate) {
        match update {
            FallbackUpdate::Delta(text) => {
                let entry = self.transcript.append_output(&text, None);
                self.emit(ClientEvent::Transcript(entry));
            }
            FallbackUpdate::ToolNote(note) => {
                let entry = self.transcript.push_final(Speaker::System, note, None);
                self.emit(ClientEvent::Transcript(entry));
            }
            FallbackUpdate::Done { first_token_ms } => {
                self.ledger.note_turn();
                let chars = self.transcript.output_len();
                if chars > 0 {
                    self.ledger
                        .record(self.settings.costs.tokens_for_chars(chars), Instant::now());
                }
                if let Some(entry) = self.transcript.finalize_output(first_token_ms) {
                    self.emit(ClientEvent::Transcript(entry));
                }
            }
            FallbackUpdate::Failed { message } => {
                if let Some(entry) = self.transcript.finalize_output(None) {
                    self.emit(ClientEvent::Transcript(entry));
                }
                let entry = self.transcript.push_final(
                    Speaker::System,
                    format!("Request failed: {message}"),
                    None,
                );
                self.emit(ClientEvent::Transcript(entry));
            }
        }
    }

    /// Cache a screen frame and forward it when a session is live.
    pub fn handle_video_frame(&mut self, frame: Vec<u8>) {
        self.video_paused = false;
        if let Some(sink) = &self.sink {
            sink.send(ClientMessage::realtime_image(BASE64.encode(&frame)));
            self.ledger
                .record(self.settings.costs.image_tokens, Instant::now());
            self.ledger.note_image();
        }
        self.last_frame = Some(frame);
    }

    /// Note that sharing began. The cached frame is cleared so a stale
    /// one is never attached before the new feed syncs.
    pub fn screen_share_started(&mut self) {
        self.last_frame = None;
        self.video_paused = false;
        if let Some(sink) = &self.sink {
            sink.send(ClientMessage::user_text(SCREEN_STARTED_NOTE));
        }
    }

    /// Note a pause or resume of the shared feed.
    pub fn video_state_changed(&mut self, paused: bool) {
        self.video_paused = paused;
        if paused {
            self.last_frame = None;
        }
        if let Some(sink) = &self.sink {
            sink.send(ClientMessage::user_text(if paused {
                SCREEN_PAUSED_NOTE
            } else {
                SCREEN_RESUMED_NOTE
            }));
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        tracing::debug!(muted, "microphone mute changed");
        self.muted = muted;
    }

    /// Prune the ledger and return the current usage snapshot.
    pub fn stats_snapshot(&mut self) -> UsageStats {
        self.ledger.snapshot(Instant::now())
    }

    fn emit_stats(&mut self) {
        let stats = self.stats_snapshot();
        self.emit(ClientEvent::Stats(stats));
    }

    fn emit_volume(&self) {
        self.emit(ClientEvent::Volume {
            input: self.input_level,
            output: self.player.output_level(),
        });
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

/// What one pass of the client loop observed.
enum Tick {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
    Fallback(Option<FallbackUpdate>),
    Capture,
    Stats,
    Volume,
}

/// Async shell around [`Session`]: owns the microphone, the command
/// channel, and the per-connection receivers.
pub struct LiveClient {
    session: Session,
    capture: AudioCapture,
    endpoint: LiveEndpoint,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl LiveClient {
    #[must_use]
    pub const fn new(
        session: Session,
        capture: AudioCapture,
        endpoint: LiveEndpoint,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            session,
            capture,
            endpoint,
            commands,
        }
    }

    /// Drive the session until `Shutdown` or the command channel closes.
    ///
    /// Runs on the caller's task: the capture handle owns a device stream
    /// and cannot move across threads.
    #[allow(clippy::future_not_send)]
    pub async fn run(self) {
        let Self {
            mut session,
            mut capture,
            endpoint,
            mut commands,
        } = self;
        let registry = session.registry().clone();
        let speech = session.speech().clone();

        let mut transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>> = None;
        let mut fallback_rx: Option<mpsc::UnboundedReceiver<FallbackUpdate>> = None;

        let mut capture_tick = tokio::time::interval(CAPTURE_POLL);
        let mut stats_tick = tokio::time::interval(STATS_PERIOD);
        let mut volume_tick = tokio::time::interval(VOLUME_PERIOD);

        loop {
            let tick = tokio::select! {
                command = commands.recv() => Tick::Command(command),
                event = next_event(&mut transport_rx) => Tick::Transport(event),
                update = next_event(&mut fallback_rx) => Tick::Fallback(update),
                _ = capture_tick.tick() => Tick::Capture,
                _ = stats_tick.tick() => Tick::Stats,
                _ = volume_tick.tick() => Tick::Volume,
            };

            match tick {
                Tick::Command(None | Some(Command::Shutdown)) => break,
                Tick::Command(Some(command)) => {
                    handle_command(
                        command,
                        &mut session,
                        &mut capture,
                        &endpoint,
                        &mut transport_rx,
                        &mut fallback_rx,
                        &registry,
                        &speech,
                    )
                    .await;
                }
                Tick::Transport(Some(TransportEvent::Message(message))) => {
                    session.handle_server(*message);
                    if !session.is_connected() {
                        // A server error frame tore the session down
                        capture.stop();
                        transport_rx = None;
                    }
                }
                Tick::Transport(Some(TransportEvent::Closed { reason })) => {
                    tracing::debug!(%reason, "realtime socket closed");
                    capture.stop();
                    transport_rx = None;
                    session.disconnect();
                }
                Tick::Transport(None) => transport_rx = None,
                Tick::Fallback(Some(update)) => session.handle_fallback(update),
                Tick::Fallback(None) => fallback_rx = None,
                Tick::Capture => {
                    let rate = capture.sample_rate();
                    for block in capture.drain_blocks() {
                        session.handle_capture_block(&block, rate);
                    }
                }
                Tick::Stats => {
                    if session.is_connected() {
                        session.emit_stats();
                    }
                }
                Tick::Volume => {
                    if session.is_connected() {
                        session.emit_volume();
                    }
                }
            }
        }

        session.disconnect();
        capture.stop();
        session.shutdown_audio();
    }
}

#[allow(clippy::too_many_arguments, clippy::future_not_send)]
async fn handle_command(
    command: Command,
    session: &mut Session,
    capture: &mut AudioCapture,
    endpoint: &LiveEndpoint,
    transport_rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
    fallback_rx: &mut Option<mpsc::UnboundedReceiver<FallbackUpdate>>,
    registry: &ToolRegistry,
    speech: &SpeechQueue,
) {
    match command {
        Command::Connect => {
            if matches!(
                session.state(),
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                tracing::debug!("already connected, ignoring connect");
                return;
            }
            session.begin_connecting();
            // Microphone first, so a missing device fails before any dial
            if let Err(e) = capture.start() {
                session.fail(format!("microphone unavailable: {e}"));
                return;
            }
            match transport::connect(endpoint, session.setup()).await {
                Ok((sink, events)) => {
                    *transport_rx = Some(events);
                    session.activate(sink);
                }
                Err(e) => {
                    capture.stop();
                    session.fail(format!("connect failed: {e}"));
                }
            }
        }
        Command::Disconnect => {
            session.disconnect();
            capture.stop();
            *transport_rx = None;
        }
        Command::SendText(text) => {
            if let Some(request) = session.send_text(&text) {
                let (tx, rx) = mpsc::unbounded_channel();
                // Replacing the receiver drops the old one, which stops a
                // fallback reply still streaming
                *fallback_rx = Some(rx);
                tokio::spawn(fallback::run(request, registry.clone(), speech.clone(), tx));
            }
        }
        Command::SendVideoFrame(frame) => session.handle_video_frame(frame),
        Command::ScreenShareStarted => session.screen_share_started(),
        Command::VideoStateChanged { paused } => session.video_state_changed(paused),
        Command::SetMuted(muted) => session.set_muted(muted),
        Command::Shutdown => {}
    }
}

/// Receive from an optional channel; absent channels never resolve, so
/// the select loop stays quiet between connections.
async fn next_event<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
