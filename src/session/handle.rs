//! Per-connection session resources

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::Result;
use crate::transport::{LiveTransport, TransportEvent};
use crate::voice::{AudioInput, CapturePipeline, FrameQueue, PlaybackScheduler, SegmentId};

/// Upper bound on waiting for the remote to acknowledge a close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Slot the microphone callback feeds once the pipeline is built
pub type PipelineSlot = Arc<Mutex<Option<CapturePipeline>>>;

/// Running transcription of the current turn
#[derive(Debug, Default)]
pub struct Transcript {
    user: String,
    agent: String,
}

impl Transcript {
    pub fn push_user(&mut self, text: &str) {
        self.user.push_str(text);
    }

    pub fn push_agent(&mut self, text: &str) {
        self.agent.push_str(text);
    }

    /// Log and reset what was said this turn
    pub fn flush(&mut self) {
        let user = self.user.trim();
        if !user.is_empty() {
            tracing::info!(text = %user, "user");
        }
        let agent = self.agent.trim();
        if !agent.is_empty() {
            tracing::info!(text = %agent, "agent");
        }
        self.user.clear();
        self.agent.clear();
    }
}

/// One live connection and everything it owns
pub struct VoiceSession {
    pub id: Uuid,
    pub span: tracing::Span,
    input: Option<Box<dyn AudioInput>>,
    pub scheduler: PlaybackScheduler,
    queue: Arc<FrameQueue>,
    sender: Option<JoinHandle<()>>,
    transport: Arc<dyn LiveTransport>,
    pub events: mpsc::Receiver<TransportEvent>,
    pub finished: mpsc::UnboundedReceiver<SegmentId>,
    /// Set until the remote acknowledges the setup
    pub handshake_deadline: Option<Instant>,
    pub transcript: Transcript,
}

/// Parts a session is assembled from
pub struct SessionParts {
    pub id: Uuid,
    pub span: tracing::Span,
    pub input: Box<dyn AudioInput>,
    pub scheduler: PlaybackScheduler,
    pub queue: Arc<FrameQueue>,
    pub transport: Arc<dyn LiveTransport>,
    pub events: mpsc::Receiver<TransportEvent>,
    pub finished: mpsc::UnboundedReceiver<SegmentId>,
    pub handshake_deadline: Instant,
}

impl VoiceSession {
    #[must_use]
    pub fn new(parts: SessionParts) -> Self {
        Self {
            id: parts.id,
            span: parts.span,
            input: Some(parts.input),
            scheduler: parts.scheduler,
            queue: parts.queue,
            sender: None,
            transport: parts.transport,
            events: parts.events,
            finished: parts.finished,
            handshake_deadline: Some(parts.handshake_deadline),
            transcript: Transcript::default(),
        }
    }

    /// Start the microphone and the sender task
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be started
    pub fn start_capture(&mut self) -> Result<()> {
        self.handshake_deadline = None;

        if self.sender.is_none() {
            let queue = Arc::clone(&self.queue);
            let transport = Arc::clone(&self.transport);
            self.sender = Some(tokio::spawn(
                send_loop(queue, transport).instrument(self.span.clone()),
            ));
        }

        if let Some(input) = self.input.as_mut() {
            input.start()?;
            tracing::debug!(sample_rate = input.sample_rate(), "capture started");
        }
        Ok(())
    }

    /// Release devices, stop the sender and close the transport
    pub async fn shutdown(mut self) {
        if let Some(mut input) = self.input.take() {
            input.stop();
        }

        self.queue.close();
        if let Some(sender) = self.sender.take() {
            sender.abort();
            let _ = sender.await;
        }

        let stop_failures = self.scheduler.flush();

        if tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close())
            .await
            .is_err()
        {
            tracing::debug!("transport close timed out");
        }

        self.transcript.flush();

        tracing::info!(
            session = %self.id,
            dropped_frames = self.queue.dropped(),
            stop_failures,
            "session closed"
        );
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(sender) = &self.sender {
            sender.abort();
        }
    }
}

/// Drain the send queue into the transport until the queue closes
async fn send_loop(queue: Arc<FrameQueue>, transport: Arc<dyn LiveTransport>) {
    let mut sent: u64 = 0;
    while let Some(frame) = queue.pop().await {
        match transport.send_realtime_input(&frame).await {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!(error = %e, "failed to send audio frame"),
        }
    }
    tracing::debug!(sent, "sender stopped");
}
