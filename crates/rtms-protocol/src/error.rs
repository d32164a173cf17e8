//! Protocol error type.

/// Error type for decoding inbound messages
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Insufficient data to decode
    #[error("Insufficient data")]
    InsufficientData,

    /// Invalid frame format
    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),

    /// Unsupported version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid media kind tag
    #[error("Invalid media kind: {0:#04x}")]
    InvalidMediaKind(u8),

    /// `msg_type` not known to this client
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Known message type whose body does not match its schema
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// Unknown types are expected as the server evolves and are only traced;
    /// every other decode failure is worth a warning.
    #[must_use]
    pub const fn is_unknown_type(&self) -> bool {
        matches!(self, ProtocolError::UnknownMessageType(_))
    }
}
