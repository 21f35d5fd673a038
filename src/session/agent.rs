//! Voice agent controller
//!
//! Owns at most one [`VoiceSession`] and drives it from user commands,
//! transport events and playback completions. Every state change is
//! published on a watch channel.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::handle::{PipelineSlot, SessionParts, VoiceSession};
use super::state::{AgentState, AgentStatus};
use crate::knowledge::InstructionProvider;
use crate::transport::protocol::ServerContent;
use crate::transport::{ServerMessage, SessionSetup, TransportConnector, TransportEvent};
use crate::voice::codec::{self, pcm_rate};
use crate::voice::{
    AnalyserTap, AudioBackend, CapturePipeline, CaptureSettings, DEFAULT_CHUNK_SIZE,
    DEFAULT_TOLERANCE, FrameQueue, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, PlaybackScheduler,
    SegmentId,
};
use crate::{Error, Result};

/// Default model for live sessions
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Default bound on the handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default send queue capacity (frames)
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// How the end of an agent turn is detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDetection {
    /// Playback caught up with the scheduling horizon
    #[default]
    Playback,
    /// Server sent `turnComplete` and playback drained
    Server,
}

impl FromStr for TurnDetection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "playback" => Ok(Self::Playback),
            "server" => Ok(Self::Server),
            other => Err(Error::Config(format!(
                "unknown turn detection mode '{other}' (expected 'playback' or 'server')"
            ))),
        }
    }
}

/// Tunables for a [`VoiceAgent`]
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOptions {
    pub model: String,
    pub voice: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
    /// Bound on opening the transport and receiving the setup acknowledgement
    pub connect_timeout: Duration,
    /// Samples per outbound frame
    pub chunk_size: usize,
    /// Frames buffered before the oldest are dropped
    pub queue_capacity: usize,
    /// Seconds before the horizon that count as caught up
    pub tolerance: f64,
    pub turn_detection: TurnDetection,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            input_transcription: true,
            output_transcription: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tolerance: DEFAULT_TOLERANCE,
            turn_detection: TurnDetection::Playback,
        }
    }
}

/// Anything the controller reacts to while a session is live
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Transport(TransportEvent),
    /// The output device finished a segment
    SegmentFinished(SegmentId),
    /// The remote did not acknowledge the setup in time
    HandshakeTimeout,
}

/// User requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Connect when idle, disconnect otherwise
    Toggle,
    Connect,
    Disconnect,
    /// Disconnect and leave [`VoiceAgent::run`]
    Shutdown,
}

enum Step {
    Command(Option<Command>),
    Event(SessionEvent),
}

/// How an interruptible connect ended
enum Attempt {
    Finished,
    Cancelled,
    Shutdown,
}

/// Controller for the voice session lifecycle
pub struct VoiceAgent {
    options: AgentOptions,
    backend: Box<dyn AudioBackend>,
    connector: Arc<dyn TransportConnector>,
    instructions: Arc<dyn InstructionProvider>,
    session: Option<VoiceSession>,
    status: watch::Sender<AgentStatus>,
    tap: AnalyserTap,
}

#[allow(clippy::future_not_send)]
impl VoiceAgent {
    /// Create an idle agent
    #[must_use]
    pub fn new(
        options: AgentOptions,
        backend: Box<dyn AudioBackend>,
        connector: Arc<dyn TransportConnector>,
        instructions: Arc<dyn InstructionProvider>,
    ) -> Self {
        let (status, _) = watch::channel(AgentStatus::default());
        Self {
            options,
            backend,
            connector,
            instructions,
            session: None,
            status,
            tap: AnalyserTap::default(),
        }
    }

    /// Current state and last error
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        self.status.borrow().clone()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.status.borrow().state
    }

    /// Observe state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AgentStatus> {
        self.status.subscribe()
    }

    /// Scheduling horizon of the live session, 0 without one
    #[must_use]
    pub fn next_start_time(&self) -> f64 {
        self.session
            .as_ref()
            .map_or(0.0, |s| s.scheduler.next_start_time())
    }

    /// Whether a session is live
    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Tap over the played output, for visualization
    #[must_use]
    pub fn analyser(&self) -> AnalyserTap {
        self.tap.clone()
    }

    /// Open a session
    ///
    /// Ignored unless idle. On failure the agent ends in
    /// [`AgentState::Error`] with the message published and no session.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the attempt
    pub async fn connect(&mut self) -> Result<()> {
        let state = self.state();
        if !state.can_connect() {
            tracing::debug!(%state, "connect ignored, session already active");
            return Ok(());
        }

        self.status.send_modify(|status| status.error = None);
        self.transition(AgentState::Connecting);

        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", id = %id);

        match self.open_session(id, span.clone()).instrument(span).await {
            Ok(session) => {
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "connect failed");
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn open_session(&self, id: Uuid, span: tracing::Span) -> Result<VoiceSession> {
        self.connector.preflight()?;

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let output = self.backend.open_output(finished_tx, self.tap.clone())?;

        let slot: PipelineSlot = Arc::new(Mutex::new(None));
        let callback_slot = Arc::clone(&slot);
        let input = self.backend.open_input(
            CaptureSettings {
                sample_rate: INPUT_SAMPLE_RATE,
            },
            Box::new(move |samples: &[f32]| {
                if let Ok(mut pipeline) = callback_slot.lock()
                    && let Some(pipeline) = pipeline.as_mut()
                {
                    pipeline.push(samples);
                }
            }),
        )?;

        let queue = Arc::new(FrameQueue::new(self.options.queue_capacity));
        let pipeline =
            CapturePipeline::new(input.sample_rate(), self.options.chunk_size, Arc::clone(&queue))?;
        *slot
            .lock()
            .map_err(|_| Error::Audio("capture pipeline poisoned".to_string()))? = Some(pipeline);

        let system_instruction = self.instructions.system_instruction().await?;

        let setup = SessionSetup {
            model: self.options.model.clone(),
            system_instruction,
            voice: self.options.voice.clone(),
            input_transcription: self.options.input_transcription,
            output_transcription: self.options.output_transcription,
        };

        let timeout = self.options.connect_timeout;
        let handshake_deadline = Instant::now() + timeout;
        let (transport, events) = tokio::time::timeout(timeout, self.connector.connect(&setup))
            .await
            .map_err(|_| handshake_timeout(timeout))??;

        tracing::info!(model = %setup.model, "transport opened, waiting for setup acknowledgement");

        Ok(VoiceSession::new(SessionParts {
            id,
            span,
            input,
            scheduler: PlaybackScheduler::with_tolerance(output, self.options.tolerance),
            queue,
            transport,
            events,
            finished: finished_rx,
            handshake_deadline,
        }))
    }

    /// Tear down the session, if any, and go idle
    ///
    /// Safe to call in any state and any number of times.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.transition(AgentState::Disconnected);
    }

    /// Connect when idle, disconnect otherwise
    ///
    /// # Errors
    ///
    /// Returns error if a connect attempt fails
    pub async fn toggle(&mut self) -> Result<()> {
        if self.state().can_connect() {
            self.connect().await
        } else {
            self.disconnect().await;
            Ok(())
        }
    }

    /// Wait for the next event of the live session
    ///
    /// Returns `None` immediately when there is no session.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let session = self.session.as_mut()?;
        let deadline = session.handshake_deadline;

        let event = tokio::select! {
            event = session.events.recv() => {
                SessionEvent::Transport(event.unwrap_or(TransportEvent::Closed(None)))
            }
            Some(id) = session.finished.recv() => SessionEvent::SegmentFinished(id),
            () = wait_until(deadline) => SessionEvent::HandshakeTimeout,
        };
        Some(event)
    }

    /// React to one session event
    pub async fn handle_event(&mut self, event: SessionEvent) {
        let span = self
            .session
            .as_ref()
            .map_or_else(tracing::Span::none, |s| s.span.clone());

        self.dispatch(event).instrument(span).await;
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Transport(TransportEvent::Opened) => self.on_opened().await,
            SessionEvent::Transport(TransportEvent::Message(msg)) => self.on_message(msg),
            SessionEvent::Transport(TransportEvent::Closed(reason))
                if self.state() == AgentState::Connecting =>
            {
                let message = reason
                    .unwrap_or_else(|| "remote closed the session before it opened".to_string());
                tracing::warn!(%message, "remote rejected the session");
                self.teardown().await;
                self.fail(message);
            }
            SessionEvent::Transport(TransportEvent::Closed(reason)) => {
                tracing::info!(?reason, "remote closed the session");
                self.disconnect().await;
            }
            SessionEvent::Transport(TransportEvent::Error(message)) => {
                tracing::error!(%message, "transport error");
                self.teardown().await;
                self.fail(message);
            }
            SessionEvent::SegmentFinished(id) => self.on_segment_finished(id),
            SessionEvent::HandshakeTimeout => {
                let message = handshake_timeout(self.options.connect_timeout).to_string();
                tracing::warn!(%message, "handshake timed out");
                self.teardown().await;
                self.fail(message);
            }
        }
    }

    /// Process commands and session events until shutdown
    ///
    /// Connect failures are published as state and logged; the loop keeps
    /// running. Returns when [`Command::Shutdown`] arrives or the command
    /// channel closes.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                Some(event) = self.next_event() => Step::Event(event),
            };

            match step {
                Step::Command(None | Some(Command::Shutdown)) => {
                    self.disconnect().await;
                    return;
                }
                Step::Command(Some(Command::Toggle | Command::Connect))
                    if self.state().can_connect() =>
                {
                    match self.connect_or_cancel(&mut commands).await {
                        Attempt::Finished => {}
                        Attempt::Cancelled => {
                            tracing::info!("connect cancelled");
                            self.disconnect().await;
                        }
                        Attempt::Shutdown => {
                            tracing::info!("connect abandoned for shutdown");
                            self.disconnect().await;
                            return;
                        }
                    }
                }
                Step::Command(Some(command)) => {
                    let result = match command {
                        Command::Toggle => self.toggle().await,
                        Command::Connect => self.connect().await,
                        Command::Disconnect | Command::Shutdown => {
                            self.disconnect().await;
                            Ok(())
                        }
                    };
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "command failed");
                    }
                }
                Step::Event(event) => self.handle_event(event).await,
            }
        }
    }

    /// Connect while still listening for commands
    ///
    /// Dropping a cancelled attempt releases whatever devices it had
    /// already opened.
    async fn connect_or_cancel(&mut self, commands: &mut mpsc::Receiver<Command>) -> Attempt {
        let attempt = self.connect();
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "command failed");
                    }
                    return Attempt::Finished;
                }
                command = commands.recv() => match command {
                    Some(Command::Connect) => tracing::debug!("already connecting"),
                    Some(Command::Toggle | Command::Disconnect) => return Attempt::Cancelled,
                    None | Some(Command::Shutdown) => return Attempt::Shutdown,
                },
            }
        }
    }

    async fn on_opened(&mut self) {
        if self.state() != AgentState::Connecting {
            tracing::debug!("ignoring duplicate setup acknowledgement");
            return;
        }

        let started = match self.session.as_mut() {
            Some(session) => session.start_capture(),
            None => return,
        };

        match started {
            Ok(()) => {
                tracing::info!("session open, listening");
                self.transition(AgentState::Listening);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start capture");
                self.teardown().await;
                self.fail(e.to_string());
            }
        }
    }

    fn on_message(&mut self, msg: ServerMessage) {
        if let Some(go_away) = &msg.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "server will close the session soon");
        }

        let state = self.state();
        if !matches!(state, AgentState::Listening | AgentState::Speaking) {
            tracing::debug!(%state, "ignoring server content before the session opened");
            return;
        }

        let scheduled = self.schedule_audio(&msg);
        if scheduled > 0 {
            self.transition(AgentState::Speaking);
        }

        if let Some(content) = msg.server_content {
            self.on_turn_signals(&content);
        }
    }

    /// Decode and queue every audio blob; returns the number scheduled
    fn schedule_audio(&mut self, msg: &ServerMessage) -> usize {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };

        let mut scheduled = 0;
        for blob in msg.audio_chunks() {
            let samples = match codec::decode(&blob.data) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(error = %e, mime_type = %blob.mime_type, "dropping malformed audio");
                    continue;
                }
            };
            if samples.is_empty() {
                continue;
            }

            let rate = pcm_rate(&blob.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE);
            match session.scheduler.schedule(samples, rate) {
                Ok(_) => scheduled += 1,
                Err(e) => tracing::warn!(error = %e, "failed to schedule playback"),
            }
        }
        scheduled
    }

    fn on_turn_signals(&mut self, content: &ServerContent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Some(t) = &content.input_transcription {
            session.transcript.push_user(&t.text);
        }
        if let Some(t) = &content.output_transcription {
            session.transcript.push_agent(&t.text);
        }

        if content.interrupted {
            let failures = session.scheduler.flush();
            tracing::info!(stop_failures = failures, "agent interrupted");
            session.transcript.flush();
            self.tap.clear();
            if self.state() == AgentState::Speaking {
                self.transition(AgentState::Listening);
            }
            return;
        }

        if content.turn_complete {
            session.scheduler.mark_turn_complete();
            session.transcript.flush();

            let drained = session.scheduler.is_drained();
            if self.options.turn_detection == TurnDetection::Server
                && drained
                && self.state() == AgentState::Speaking
            {
                self.transition(AgentState::Listening);
            }
        }
    }

    fn on_segment_finished(&mut self, id: SegmentId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let caught_up = session.scheduler.segment_ended(id);
        let turn_over = match self.options.turn_detection {
            TurnDetection::Playback => caught_up,
            TurnDetection::Server => caught_up && session.scheduler.turn_complete(),
        };

        tracing::trace!(id, caught_up, "segment finished");

        if turn_over && self.state() == AgentState::Speaking {
            self.transition(AgentState::Listening);
        }
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            let span = session.span.clone();
            session.shutdown().instrument(span).await;
        }
        self.tap.clear();
    }

    fn transition(&self, next: AgentState) {
        self.status.send_if_modified(|status| {
            let from = status.state;
            if from == next {
                return false;
            }
            if !from.can_transition_to(next) {
                tracing::warn!(%from, to = %next, "ignoring invalid state transition");
                return false;
            }
            tracing::debug!(%from, to = %next, "state transition");
            status.state = next;
            true
        });
    }

    fn fail(&self, message: String) {
        self.status.send_modify(|status| {
            if status.state.can_transition_to(AgentState::Error) {
                tracing::debug!(from = %status.state, "state transition to error");
                status.state = AgentState::Error;
            }
            status.error = Some(message);
        });
    }
}

fn handshake_timeout(timeout: Duration) -> Error {
    Error::Transport(format!(
        "no response from the remote within {}s",
        timeout.as_secs_f64()
    ))
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_detection_parse() {
        assert_eq!("playback".parse::<TurnDetection>().unwrap(), TurnDetection::Playback);
        assert_eq!(" Server ".parse::<TurnDetection>().unwrap(), TurnDetection::Server);
        assert!("vad".parse::<TurnDetection>().is_err());
    }

    #[test]
    fn test_default_options() {
        let options = AgentOptions::default();
        assert_eq!(options.model, DEFAULT_MODEL);
        assert_eq!(options.chunk_size, 4096);
        assert_eq!(options.connect_timeout, Duration::from_secs(15));
        assert_eq!(options.turn_detection, TurnDetection::Playback);
    }

    #[test]
    fn test_handshake_timeout_message() {
        let message = handshake_timeout(Duration::from_secs(15)).to_string();
        assert!(message.contains("15s"), "{message}");
    }
}
