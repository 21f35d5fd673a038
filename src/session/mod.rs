//! Voice session lifecycle
//!
//! [`VoiceAgent`] is the single owner of the live connection. It runs on
//! the caller's task because the audio device streams are not `Send`.

mod agent;
mod handle;
mod state;

pub use agent::{
    AgentOptions, Command, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MODEL, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_VOICE, SessionEvent, TurnDetection, VoiceAgent,
};
pub use state::{AgentState, AgentStatus};
