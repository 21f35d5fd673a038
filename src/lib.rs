//! Beacon Live - Realtime voice conversations with Gemini Live
//!
//! This library provides the streaming audio pipeline behind the
//! `beacon-live` terminal client:
//! - Microphone capture, PCM framing and bounded send queueing
//! - Gapless, clock-scheduled playback of the agent's speech
//! - The Gemini Live WebSocket transport
//! - The session state machine tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────┐  realtimeInput  ┌──────────────┐
//! │  Microphone  ├──────────►│  Send queue  ├────────────────►│              │
//! └──────────────┘           └──────────────┘                 │  Gemini Live │
//!                                                             │  (WebSocket) │
//! ┌──────────────┐  segments ┌──────────────┐   serverContent │              │
//! │   Speaker    │◄──────────┤  Scheduler   │◄────────────────┤              │
//! └──────┬───────┘           └──────────────┘                 └──────────────┘
//!        │ tap
//! ┌──────▼───────┐
//! │  Visualizer  │           VoiceAgent owns and drives the session
//! └──────────────┘
//! ```

pub mod config;
pub mod error;
pub mod knowledge;
pub mod session;
pub mod transport;
pub mod visualizer;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use knowledge::{FileInstructions, InstructionProvider, StaticInstructions};
pub use session::{AgentOptions, AgentState, AgentStatus, VoiceAgent};
pub use transport::{GeminiLiveConnector, LiveTransport, TransportConnector, TransportEvent};
pub use visualizer::{Visualizer, VisualizerOptions};
