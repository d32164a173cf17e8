//! Stream, session and participant state values carried by control messages.

use serde::{Deserialize, Serialize};

/// Transport-level state of a stream as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamState {
    Inactive,
    Active,
    Interrupted,
    Terminating,
    Terminated,
}

impl StreamState {
    /// Whether this state ends the stream.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, StreamState::Terminating | StreamState::Terminated)
    }
}

/// Session lifecycle operation carried by `SESSION_STATE_UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    Add,
    Stop,
    Pause,
    Resume,
}

impl SessionEvent {
    /// Numeric operation code passed to session callbacks.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            SessionEvent::Add => 0,
            SessionEvent::Stop => 1,
            SessionEvent::Pause => 2,
            SessionEvent::Resume => 3,
        }
    }
}

/// Participant operation carried by `EVENT_UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserEvent {
    UserJoin,
    UserLeave,
}

impl UserEvent {
    /// Numeric operation code passed to user callbacks.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            UserEvent::UserJoin => 0,
            UserEvent::UserLeave => 1,
        }
    }
}
