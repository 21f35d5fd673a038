//! Shared test utilities
//!
//! In-memory stand-ins for the audio devices and the remote, so the session
//! control flow runs without hardware or network.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_live::session::{AgentState, AgentStatus, SessionEvent, VoiceAgent};
use beacon_live::transport::{
    LiveTransport, ServerMessage, SessionSetup, TransportConnector, TransportEvent,
};
use beacon_live::voice::{
    AnalyserTap, AudioBackend, AudioFrame, AudioInput, AudioOutput, CaptureSettings,
    INPUT_SAMPLE_RATE, PlaybackSegment, SampleCallback, SegmentId,
};
use beacon_live::{Error, Result};
use tokio::sync::{mpsc, watch};

/// A segment as the mock output received it
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub id: SegmentId,
    pub start_at: f64,
    pub samples: usize,
}

struct AudioState {
    clock: f64,
    input_rate: u32,
    deny_microphone: bool,
    mic_callback: Option<SampleCallback>,
    mic_open: bool,
    mic_started: bool,
    outputs_opened: usize,
    finished: Option<mpsc::UnboundedSender<SegmentId>>,
    enqueued: Vec<Enqueued>,
    stopped: Vec<SegmentId>,
    observer: Option<watch::Receiver<AgentStatus>>,
    state_at_open: Option<AgentState>,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            clock: 0.0,
            input_rate: INPUT_SAMPLE_RATE,
            deny_microphone: false,
            mic_callback: None,
            mic_open: false,
            mic_started: false,
            outputs_opened: 0,
            finished: None,
            enqueued: Vec::new(),
            stopped: Vec::new(),
            observer: None,
            state_at_open: None,
        }
    }
}

/// Fake microphone and speaker with a settable clock
#[derive(Clone, Default)]
pub struct MockAudio {
    state: Arc<Mutex<AudioState>>,
}

impl MockAudio {
    pub fn backend(&self) -> Box<dyn AudioBackend> {
        Box::new(MockBackend(self.clone()))
    }

    /// Refuse microphone access like a denied permission prompt
    pub fn deny_microphone(&self) {
        self.state.lock().unwrap().deny_microphone = true;
    }

    /// Report a device rate other than 16 kHz
    pub fn set_input_rate(&self, rate: u32) {
        self.state.lock().unwrap().input_rate = rate;
    }

    /// Record the agent state whenever the microphone is opened
    pub fn observe(&self, status: watch::Receiver<AgentStatus>) {
        self.state.lock().unwrap().observer = Some(status);
    }

    pub fn state_at_open(&self) -> Option<AgentState> {
        self.state.lock().unwrap().state_at_open
    }

    pub fn set_clock(&self, seconds: f64) {
        self.state.lock().unwrap().clock = seconds;
    }

    /// Deliver samples as if captured; ignored unless the mic is started
    pub fn speak(&self, samples: &[f32]) {
        let mut state = self.state.lock().unwrap();
        if !state.mic_started {
            return;
        }
        if let Some(callback) = state.mic_callback.as_mut() {
            callback(samples);
        }
    }

    /// Report a segment as played to the end
    pub fn finish(&self, id: SegmentId) {
        let state = self.state.lock().unwrap();
        if let Some(finished) = &state.finished {
            let _ = finished.send(id);
        }
    }

    pub fn mic_open(&self) -> bool {
        self.state.lock().unwrap().mic_open
    }

    pub fn mic_started(&self) -> bool {
        self.state.lock().unwrap().mic_started
    }

    pub fn outputs_opened(&self) -> usize {
        self.state.lock().unwrap().outputs_opened
    }

    pub fn enqueued(&self) -> Vec<Enqueued> {
        self.state.lock().unwrap().enqueued.clone()
    }

    pub fn stopped(&self) -> Vec<SegmentId> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// An output device on the shared clock, for driving a scheduler directly
    pub fn output(&self) -> Box<dyn AudioOutput> {
        Box::new(MockOutput(self.clone()))
    }
}

struct MockBackend(MockAudio);

impl AudioBackend for MockBackend {
    fn open_input(
        &self,
        _settings: CaptureSettings,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn AudioInput>> {
        let mut state = self.0.state.lock().unwrap();
        state.state_at_open = state.observer.as_ref().map(|rx| rx.borrow().state);

        if state.deny_microphone {
            return Err(Error::PermissionDenied(
                "access to the default input device was refused".to_string(),
            ));
        }

        state.mic_callback = Some(on_samples);
        state.mic_open = true;
        Ok(Box::new(MockInput(self.0.clone())))
    }

    fn open_output(
        &self,
        finished: mpsc::UnboundedSender<SegmentId>,
        _tap: AnalyserTap,
    ) -> Result<Box<dyn AudioOutput>> {
        let mut state = self.0.state.lock().unwrap();
        state.outputs_opened += 1;
        state.clock = 0.0;
        state.finished = Some(finished);
        Ok(Box::new(MockOutput(self.0.clone())))
    }
}

struct MockInput(MockAudio);

impl AudioInput for MockInput {
    fn sample_rate(&self) -> u32 {
        self.0.state.lock().unwrap().input_rate
    }

    fn start(&mut self) -> Result<()> {
        self.0.state.lock().unwrap().mic_started = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.0.state.lock().unwrap();
        state.mic_started = false;
        state.mic_open = false;
        state.mic_callback = None;
    }
}

impl Drop for MockInput {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.state.lock() {
            state.mic_started = false;
            state.mic_open = false;
            state.mic_callback = None;
        }
    }
}

struct MockOutput(MockAudio);

impl AudioOutput for MockOutput {
    fn current_time(&self) -> f64 {
        self.0.state.lock().unwrap().clock
    }

    fn enqueue(&mut self, segment: PlaybackSegment) -> Result<()> {
        self.0.state.lock().unwrap().enqueued.push(Enqueued {
            id: segment.id,
            start_at: segment.start_at,
            samples: segment.samples.len(),
        });
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) -> Result<()> {
        self.0.state.lock().unwrap().stopped.push(id);
        Ok(())
    }
}

#[derive(Default)]
struct RemoteState {
    missing_key: bool,
    reject: Option<String>,
    hang: bool,
    events: Option<mpsc::Sender<TransportEvent>>,
    setups: Vec<SessionSetup>,
    sent: Vec<AudioFrame>,
    closed: usize,
}

/// Scriptable remote agent
#[derive(Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn connector(&self) -> Arc<dyn TransportConnector> {
        Arc::new(MockConnector(self.clone()))
    }

    pub fn missing_key(&self) {
        self.state.lock().unwrap().missing_key = true;
    }

    /// Fail every connect attempt with `reason`
    pub fn reject(&self, reason: &str) {
        self.state.lock().unwrap().reject = Some(reason.to_string());
    }

    /// Never complete a connect attempt
    pub fn hang(&self) {
        self.state.lock().unwrap().hang = true;
    }

    /// Undo any scripted failure
    pub fn allow(&self) {
        let mut state = self.state.lock().unwrap();
        state.missing_key = false;
        state.reject = None;
        state.hang = false;
    }

    fn emit(&self, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        if let Some(events) = &state.events {
            events.try_send(event).unwrap();
        }
    }

    /// Acknowledge the session setup
    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn send(&self, msg: ServerMessage) {
        self.emit(TransportEvent::Message(msg));
    }

    pub fn close(&self, reason: Option<&str>) {
        self.emit(TransportEvent::Closed(reason.map(ToString::to_string)));
    }

    pub fn error(&self, message: &str) {
        self.emit(TransportEvent::Error(message.to_string()));
    }

    pub fn setups(&self) -> Vec<SessionSetup> {
        self.state.lock().unwrap().setups.clone()
    }

    pub fn sent(&self) -> Vec<AudioFrame> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

struct MockConnector(MockRemote);

#[async_trait]
impl TransportConnector for MockConnector {
    fn preflight(&self) -> Result<()> {
        if self.0.state.lock().unwrap().missing_key {
            return Err(Error::MissingCredential("API key not found".to_string()));
        }
        Ok(())
    }

    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Arc<dyn LiveTransport>, mpsc::Receiver<TransportEvent>)> {
        let hang = {
            let mut state = self.0.state.lock().unwrap();
            state.setups.push(setup.clone());
            if let Some(reason) = &state.reject {
                return Err(Error::Transport(reason.clone()));
            }
            state.hang
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::channel(64);
        self.0.state.lock().unwrap().events = Some(tx);
        Ok((Arc::new(MockTransport(self.0.clone())), rx))
    }
}

struct MockTransport(MockRemote);

#[async_trait]
impl LiveTransport for MockTransport {
    async fn send_realtime_input(&self, frame: &AudioFrame) -> Result<()> {
        self.0.state.lock().unwrap().sent.push(frame.clone());
        Ok(())
    }

    async fn close(&self) {
        self.0.state.lock().unwrap().closed += 1;
    }
}

/// Handle every event that arrives within a short quiet period
pub async fn pump(agent: &mut VoiceAgent) {
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(50), agent.next_event()).await
    {
        agent.handle_event(event).await;
    }
}

/// Wait for the next event and handle it
pub async fn step(agent: &mut VoiceAgent) -> SessionEvent {
    let event = tokio::time::timeout(Duration::from_secs(2), agent.next_event())
        .await
        .expect("no session event within 2s")
        .expect("no live session");
    agent.handle_event(event.clone()).await;
    event
}

/// Poll `condition` until it holds, yielding to spawned tasks in between
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 1s");
}
