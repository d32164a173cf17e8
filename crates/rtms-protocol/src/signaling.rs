//! JSON control messages exchanged on the signaling path.
//!
//! Every message is an object tagged by `msg_type`. Optional fields are
//! omitted when serializing and default to `None` when absent.

use crate::error::ProtocolError;
use crate::stream::{SessionEvent, StreamState, UserEvent};
use serde::{Deserialize, Serialize};

/// Protocol version sent in the handshake request.
pub const PROTOCOL_VERSION: u32 = 1;

/// `status_code` value accepting a handshake.
pub const STATUS_OK: i32 = 0;

/// Audio stream parameters requested in the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<u32>,
    /// `SR_8K` = 0, `SR_16K` = 1, `SR_32K` = 2, `SR_48K` = 3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// 1 = mono, 2 = stereo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_opt: Option<u32>,
    /// Frame duration in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// Frame size in samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<u32>,
}

/// Video stream parameters requested in the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_opt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

/// Desktop share parameters requested in the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskshareParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

/// Per-kind media parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deskshare: Option<DeskshareParams>,
}

impl MediaParams {
    fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none() && self.deskshare.is_none()
    }
}

/// `SIGNALING_HAND_SHAKE_REQ` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol_version: u32,
    pub sequence: u64,
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    pub signature: String,
    /// Negotiated `MediaTypes` bits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<u32>,
    #[serde(default, skip_serializing_if = "MediaParams::is_empty")]
    pub media_params: MediaParams,
}

/// `SIGNALING_HAND_SHAKE_RESP` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Absent or unrecognized codes are treated as rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_server: Option<String>,
}

impl HandshakeResponse {
    /// Whether the server accepted the handshake.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status_code == Some(STATUS_OK)
    }
}

/// `SESSION_STATE_UPDATE` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStateUpdate {
    pub state: SessionEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Unix timestamp of session start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
}

/// `EVENT_UPDATE` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEvent {
    pub event: UserEvent,
    pub user_id: u32,
    #[serde(default)]
    pub user_name: String,
}

/// A control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg_type")]
pub enum SignalingMessage {
    #[serde(rename = "SIGNALING_HAND_SHAKE_REQ")]
    HandshakeRequest(HandshakeRequest),

    #[serde(rename = "SIGNALING_HAND_SHAKE_RESP")]
    HandshakeResponse(HandshakeResponse),

    #[serde(rename = "CLIENT_READY_ACK")]
    ClientReadyAck { rtms_stream_id: String },

    #[serde(rename = "KEEP_ALIVE_REQ")]
    KeepAliveRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    #[serde(rename = "KEEP_ALIVE_RESP")]
    KeepAliveResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    #[serde(rename = "STREAM_STATE_UPDATE")]
    StreamStateUpdate {
        state: StreamState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<i32>,
    },

    #[serde(rename = "SESSION_STATE_UPDATE")]
    SessionStateUpdate(SessionStateUpdate),

    #[serde(rename = "EVENT_UPDATE")]
    EventUpdate(ParticipantEvent),
}

impl SignalingMessage {
    /// Every control `msg_type` this client understands.
    pub const MSG_TYPES: [&'static str; 8] = [
        "SIGNALING_HAND_SHAKE_REQ",
        "SIGNALING_HAND_SHAKE_RESP",
        "CLIENT_READY_ACK",
        "KEEP_ALIVE_REQ",
        "KEEP_ALIVE_RESP",
        "STREAM_STATE_UPDATE",
        "SESSION_STATE_UPDATE",
        "EVENT_UPDATE",
    ];

    /// Whether `msg_type` names a control message.
    #[must_use]
    pub fn is_known(msg_type: &str) -> bool {
        Self::MSG_TYPES.contains(&msg_type)
    }

    /// The wire `msg_type` of this message.
    #[must_use]
    pub const fn msg_type(&self) -> &'static str {
        match self {
            SignalingMessage::HandshakeRequest(_) => "SIGNALING_HAND_SHAKE_REQ",
            SignalingMessage::HandshakeResponse(_) => "SIGNALING_HAND_SHAKE_RESP",
            SignalingMessage::ClientReadyAck { .. } => "CLIENT_READY_ACK",
            SignalingMessage::KeepAliveRequest { .. } => "KEEP_ALIVE_REQ",
            SignalingMessage::KeepAliveResponse { .. } => "KEEP_ALIVE_RESP",
            SignalingMessage::StreamStateUpdate { .. } => "STREAM_STATE_UPDATE",
            SignalingMessage::SessionStateUpdate(_) => "SESSION_STATE_UPDATE",
            SignalingMessage::EventUpdate(_) => "EVENT_UPDATE",
        }
    }

    /// Serialize to the JSON text sent over the connection.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Malformed` if serialization fails
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}
