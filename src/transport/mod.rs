//! Remote transport to the conversational speech API
//!
//! The session treats the transport as an opaque bidirectional channel:
//! frames go out through [`LiveTransport`], everything coming back arrives
//! as [`TransportEvent`]s on an mpsc receiver.

mod gemini;
pub mod protocol;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use gemini::GeminiLiveConnector;
pub use protocol::ServerMessage;

use crate::Result;
use crate::voice::AudioFrame;

/// Capacity of the inbound event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Parameters for opening a remote session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Model identifier
    pub model: String,
    /// Behavioral instructions, passed verbatim
    pub system_instruction: String,
    /// Prebuilt voice name
    pub voice: String,
    /// Request transcription of the user's speech
    pub input_transcription: bool,
    /// Request transcription of the agent's speech
    pub output_transcription: bool,
}

/// An event produced by the transport layer
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The remote accepted the session setup
    Opened,
    /// A message from the remote agent
    Message(ServerMessage),
    /// The connection closed, with the remote's reason if any
    Closed(Option<String>),
    /// The remote or the connection reported an error
    Error(String),
}

/// An open connection to the remote agent
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Send one realtime audio frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be written to the connection
    async fn send_realtime_input(&self, frame: &AudioFrame) -> Result<()>;

    /// Close the connection
    async fn close(&self);
}

/// Opens transports
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Check that the connector can be used at all (e.g. credentials)
    ///
    /// # Errors
    ///
    /// Returns error if a connect attempt would certainly fail
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Open a session; returns the send handle and the event stream
    ///
    /// # Errors
    ///
    /// Returns error if the connection or the setup message fails
    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Arc<dyn LiveTransport>, mpsc::Receiver<TransportEvent>)>;
}
