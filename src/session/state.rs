//! Agent connection state

use std::fmt;

/// Lifecycle state of the voice agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AgentState {
    /// No session; ready to connect
    #[default]
    Disconnected,
    /// Devices opened, waiting for the remote to accept the session
    Connecting,
    /// Microphone streaming, no agent speech queued
    Listening,
    /// Agent speech is playing
    Speaking,
    /// Last connection attempt or session failed
    Error,
}

impl AgentState {
    /// Whether moving from `self` to `next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (_, Self::Disconnected)
            | (Self::Disconnected | Self::Error, Self::Connecting)
            | (Self::Connecting, Self::Listening)
            | (Self::Listening | Self::Speaking, Self::Speaking)
            | (Self::Speaking, Self::Listening) => true,
            (from, Self::Error) => from.is_active(),
            _ => false,
        }
    }

    /// Whether a session exists in this state
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Listening | Self::Speaking)
    }

    /// Whether a connect request is accepted in this state
    #[must_use]
    pub const fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Short human-readable label for status displays
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Ready",
            Self::Connecting => "Connecting",
            Self::Listening => "Listening",
            Self::Speaking => "Speaking",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// State published to observers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStatus {
    pub state: AgentState,
    /// Last error message; cleared on the next connect
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AgentState; 5] = [
        AgentState::Disconnected,
        AgentState::Connecting,
        AgentState::Listening,
        AgentState::Speaking,
        AgentState::Error,
    ];

    #[test]
    fn test_transition_table() {
        use AgentState::{Connecting, Disconnected, Error, Listening, Speaking};

        let allowed = [
            (Disconnected, Connecting),
            (Error, Connecting),
            (Connecting, Listening),
            (Listening, Speaking),
            (Speaking, Speaking),
            (Speaking, Listening),
            (Connecting, Error),
            (Listening, Error),
            (Speaking, Error),
        ];

        for from in ALL {
            for to in ALL {
                let expected = to == Disconnected || allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_error_only_from_active_states() {
        assert!(!AgentState::Disconnected.can_transition_to(AgentState::Error));
        assert!(!AgentState::Error.can_transition_to(AgentState::Error));
    }

    #[test]
    fn test_listening_not_reachable_from_idle() {
        assert!(!AgentState::Disconnected.can_transition_to(AgentState::Listening));
        assert!(!AgentState::Error.can_transition_to(AgentState::Speaking));
        assert!(!AgentState::Listening.can_transition_to(AgentState::Connecting));
    }

    #[test]
    fn test_labels() {
        assert_eq!(AgentState::Disconnected.label(), "Ready");
        assert_eq!(AgentState::Speaking.label(), "Speaking");
        assert_eq!(AgentState::Listening.to_string(), "listening");
        assert_eq!(AgentStatus::default().state, AgentState::Disconnected);
    }
}
