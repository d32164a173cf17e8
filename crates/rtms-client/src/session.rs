//! Session and participant records tracked from control messages.

use chrono::{DateTime, Utc};
use rtms_protocol::signaling::{ParticipantEvent, SessionStateUpdate};
use rtms_protocol::SessionEvent;
use std::fmt;

/// Lifecycle of the meeting-level session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Inactive,
    /// Handshake accepted, no session started yet
    Initialize,
    Started,
    Paused,
    Resumed,
    Stopped,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Inactive => "INACTIVE",
            SessionStatus::Initialize => "INITIALIZE",
            SessionStatus::Started => "STARTED",
            SessionStatus::Paused => "PAUSED",
            SessionStatus::Resumed => "RESUMED",
            SessionStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the session passed to `on_session_update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub is_active: bool,
    pub is_paused: bool,
}

impl SessionInfo {
    /// Session created by an accepted handshake.
    #[must_use]
    pub fn initialized() -> Self {
        Self {
            session_id: String::new(),
            start_time: None,
            status: SessionStatus::Initialize,
            is_active: false,
            is_paused: false,
        }
    }

    /// Apply a `SESSION_STATE_UPDATE`.
    pub fn apply(&mut self, update: &SessionStateUpdate) {
        if let Some(session_id) = &update.session_id {
            self.session_id.clone_from(session_id);
        }
        if let Some(start) = update.start_time.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)) {
            self.start_time = Some(start);
        }

        match update.state {
            SessionEvent::Add => {
                self.status = SessionStatus::Started;
                self.is_active = true;
                self.is_paused = false;
            }
            SessionEvent::Pause => {
                self.status = SessionStatus::Paused;
                self.is_paused = true;
            }
            SessionEvent::Resume => {
                self.status = SessionStatus::Resumed;
                self.is_paused = false;
            }
            SessionEvent::Stop => {
                self.status = SessionStatus::Stopped;
                self.is_active = false;
                self.is_paused = false;
            }
        }
    }
}

/// A meeting participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: u32,
    pub name: String,
}

impl From<&ParticipantEvent> for Participant {
    fn from(event: &ParticipantEvent) -> Self {
        Self {
            id: event.user_id,
            name: event.user_name.clone(),
        }
    }
}
