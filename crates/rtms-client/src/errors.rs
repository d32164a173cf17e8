//! RTMS client error types.
//!
//! Errors map onto the SDK status codes reported through `on_join_confirm`
//! and `on_leave`. Internal details stay in `Display` for logs; nothing here
//! ever carries the client secret or a signature.

use crate::config::ConfigError;
use rtms_protocol::ProtocolError;
use thiserror::Error;

/// SDK status and reason codes.
pub mod status {
    pub const FAILURE: i32 = -1;
    pub const OK: i32 = 0;
    pub const TIMEOUT: i32 = 1;
    pub const NOT_EXIST: i32 = 2;
    pub const WRONG_TYPE: i32 = 3;
    pub const INVALID_STATUS: i32 = 4;
    pub const INVALID_ARGS: i32 = 5;
}

/// RTMS client error type.
///
/// Maps to status codes:
/// - `MissingCredential`, `InvalidArgs`, `Config`: `INVALID_ARGS` (5)
/// - `TimedOut`, `LivenessFault`: `TIMEOUT` (1)
/// - `HandshakeRejected`: the server's own status code
/// - `NotConnected`, `InvalidState`: `INVALID_STATUS` (4)
/// - `MalformedMessage`: `WRONG_TYPE` (3)
/// - `ConnectFailed`, `CallbackError`, `Tls`: `FAILURE` (-1)
#[derive(Debug, Error)]
pub enum RtmsError {
    /// Client ID or secret resolved to empty. Raised before any network I/O.
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    /// No candidate URL accepted the connection.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// A deadline-bounded operation expired.
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// Server refused the handshake.
    #[error("Handshake rejected with status {status_code}")]
    HandshakeRejected {
        status_code: i32,
        reason: Option<String>,
    },

    /// Peer stopped talking or a keepalive answer could not be sent.
    #[error("Liveness fault: {0}")]
    LivenessFault(String),

    /// Send attempted on a closed transport.
    #[error("Not connected")]
    NotConnected,

    /// Inbound message could not be decoded.
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] ProtocolError),

    /// A consumer callback panicked.
    #[error("Callback error in {slot}: {message}")]
    CallbackError { slot: &'static str, message: String },

    /// Operation not allowed in the current stream state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller supplied unusable parameters.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// TLS setup failed (unreadable or empty CA bundle).
    #[error("TLS error: {0}")]
    Tls(String),
}

impl RtmsError {
    /// Returns the SDK status code for this error.
    #[must_use]
    pub fn status_code(&self) -> i32 {
        match self {
            RtmsError::MissingCredential(_) | RtmsError::InvalidArgs(_) | RtmsError::Config(_) => {
                status::INVALID_ARGS
            }
            RtmsError::TimedOut(_) | RtmsError::LivenessFault(_) => status::TIMEOUT,
            RtmsError::HandshakeRejected { status_code, .. } => *status_code,
            RtmsError::NotConnected | RtmsError::InvalidState(_) => status::INVALID_STATUS,
            RtmsError::MalformedMessage(_) => status::WRONG_TYPE,
            RtmsError::ConnectFailed(_) | RtmsError::CallbackError { .. } | RtmsError::Tls(_) => {
                status::FAILURE
            }
        }
    }

    /// Returns a message safe to show to end users (no hosts, paths or payloads).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RtmsError::MissingCredential(which) => format!("Missing {which}"),
            RtmsError::ConnectFailed(_) => "Could not reach the streaming server".to_string(),
            RtmsError::TimedOut(_) => "The operation timed out".to_string(),
            RtmsError::HandshakeRejected { status_code, .. } => {
                format!("Server rejected the stream (status {status_code})")
            }
            RtmsError::LivenessFault(_) => "Connection to the server was lost".to_string(),
            RtmsError::NotConnected => "Not connected".to_string(),
            RtmsError::MalformedMessage(_) => "Received an invalid message".to_string(),
            RtmsError::CallbackError { slot, .. } => format!("Callback {slot} failed"),
            RtmsError::InvalidState(msg) | RtmsError::InvalidArgs(msg) => msg.clone(),
            RtmsError::Config(_) | RtmsError::Tls(_) => "Client is misconfigured".to_string(),
        }
    }
}
