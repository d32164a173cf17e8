//! Media frame types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Kind of media carried by a frame.
///
/// The discriminant doubles as the on-wire tag and as the bit in
/// [`MediaTypes`] that enables the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MediaKind {
    /// Audio samples
    Audio = 0x01,
    /// Video frame (carries a track ID)
    Video = 0x02,
    /// Desktop share frame
    Deskshare = 0x04,
    /// Transcript text
    Transcript = 0x08,
    /// Chat message
    Chat = 0x10,
}

impl MediaKind {
    /// Every media kind, in tag order.
    pub const ALL: [MediaKind; 5] = [
        MediaKind::Audio,
        MediaKind::Video,
        MediaKind::Deskshare,
        MediaKind::Transcript,
        MediaKind::Chat,
    ];

    /// Parse an on-wire tag.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(MediaKind::Audio),
            0x02 => Some(MediaKind::Video),
            0x04 => Some(MediaKind::Deskshare),
            0x08 => Some(MediaKind::Transcript),
            0x10 => Some(MediaKind::Chat),
            _ => None,
        }
    }

    /// The `msg_type` used for JSON media messages of this kind.
    #[must_use]
    pub const fn msg_type(self) -> &'static str {
        match self {
            MediaKind::Audio => "MEDIA_DATA_AUDIO",
            MediaKind::Video => "MEDIA_DATA_VIDEO",
            MediaKind::Deskshare => "MEDIA_DATA_SHARE",
            MediaKind::Transcript => "MEDIA_DATA_TRANSCRIPT",
            MediaKind::Chat => "MEDIA_DATA_CHAT",
        }
    }

    /// Parse a JSON media `msg_type`.
    #[must_use]
    pub fn from_msg_type(msg_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.msg_type() == msg_type)
    }

    /// Short lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Deskshare => "deskshare",
            MediaKind::Transcript => "transcript",
            MediaKind::Chat => "chat",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bitmask of media kinds negotiated for a stream.
///
/// `ALL` is a distinct flag meaning every kind shares one data connection;
/// it enables every kind regardless of the other bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaTypes(u32);

impl MediaTypes {
    pub const NONE: MediaTypes = MediaTypes(0);
    pub const AUDIO: MediaTypes = MediaTypes(MediaKind::Audio as u32);
    pub const VIDEO: MediaTypes = MediaTypes(MediaKind::Video as u32);
    pub const DESKSHARE: MediaTypes = MediaTypes(MediaKind::Deskshare as u32);
    pub const TRANSCRIPT: MediaTypes = MediaTypes(MediaKind::Transcript as u32);
    pub const CHAT: MediaTypes = MediaTypes(MediaKind::Chat as u32);
    pub const ALL: MediaTypes = MediaTypes(0x20);

    /// Build from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits as sent in the handshake.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether frames of `kind` are accepted.
    #[must_use]
    pub const fn contains(self, kind: MediaKind) -> bool {
        self.0 & Self::ALL.0 != 0 || self.0 & (kind as u32) != 0
    }

    /// Enable `kind`.
    #[must_use]
    pub const fn with(self, kind: MediaKind) -> Self {
        Self(self.0 | kind as u32)
    }

    /// Disable `kind`. Has no effect on the `ALL` flag.
    #[must_use]
    pub const fn without(self, kind: MediaKind) -> Self {
        Self(self.0 & !(kind as u32))
    }

    /// No kind enabled.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MediaTypes {
    type Output = MediaTypes;

    fn bitor(self, rhs: Self) -> Self::Output {
        MediaTypes(self.0 | rhs.0)
    }
}

impl From<MediaKind> for MediaTypes {
    fn from(kind: MediaKind) -> Self {
        MediaTypes(kind as u32)
    }
}

/// Participant that produced a frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SenderMetadata {
    /// Display name
    pub user_name: String,
    /// Participant identifier
    pub user_id: u32,
}

impl SenderMetadata {
    /// Create sender metadata.
    #[must_use]
    pub fn new(user_name: impl Into<String>, user_id: u32) -> Self {
        Self {
            user_name: user_name.into(),
            user_id,
        }
    }
}

/// A media frame with metadata
///
/// Binary frame format (22 bytes header, big-endian):
/// - Version: 1 byte
/// - Media Kind: 1 byte
/// - Timestamp: 8 bytes
/// - User ID: 4 bytes
/// - User Name Length: 2 bytes
/// - Track ID Length: 2 bytes (0 when absent)
/// - Payload Length: 4 bytes
/// - User Name: variable (UTF-8)
/// - Track ID: variable (UTF-8)
/// - Payload: variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    /// Protocol version (currently 1)
    pub version: u8,
    /// Kind of media
    pub kind: MediaKind,
    /// Sender-side timestamp
    pub timestamp: u64,
    /// Participant that produced the frame
    pub metadata: SenderMetadata,
    /// Video track, if any
    pub track_id: Option<String>,
    /// Raw media payload
    pub payload: Bytes,
}

impl MediaFrame {
    /// Header size in bytes
    pub const HEADER_SIZE: usize = 22;

    /// Current protocol version
    pub const VERSION: u8 = 1;

    /// Create a frame at the current protocol version.
    #[must_use]
    pub fn new(
        kind: MediaKind,
        payload: impl Into<Bytes>,
        timestamp: u64,
        metadata: SenderMetadata,
    ) -> Self {
        Self {
            version: Self::VERSION,
            kind,
            timestamp,
            metadata,
            track_id: None,
            payload: payload.into(),
        }
    }

    /// Attach a track ID.
    #[must_use]
    pub fn with_track_id(mut self, track_id: impl Into<String>) -> Self {
        self.track_id = Some(track_id.into());
        self
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
