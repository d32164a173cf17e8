//! Inbound message classification.

use crate::codec::decode_frame;
use crate::error::ProtocolError;
use crate::frame::{MediaFrame, MediaKind, SenderMetadata};
use crate::signaling::{HandshakeResponse, SignalingMessage, STATUS_OK};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Control message
    Signaling(SignalingMessage),
    /// Media payload, from either a binary frame or a JSON media message
    Media(MediaFrame),
}

impl Inbound {
    /// Label for diagnostics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Inbound::Signaling(message) => message.msg_type(),
            Inbound::Media(frame) => frame.kind.msg_type(),
        }
    }
}

/// Body of a JSON media message.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MediaContent {
    #[serde(default)]
    user_id: u32,
    #[serde(default)]
    user_name: String,
    /// Base64 payload
    data: String,
    #[serde(default)]
    timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    track_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MediaMessage {
    msg_type: String,
    content: MediaContent,
}

/// Decode a text frame.
///
/// Media `msg_type`s become [`Inbound::Media`]; control `msg_type`s are
/// parsed in full.
///
/// # Errors
///
/// - `UnknownMessageType` for a well-formed object with an unrecognized
///   `msg_type`
/// - `Malformed` for invalid JSON, a missing `msg_type`, or a known type
///   whose body does not fit its schema
pub fn decode_text(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let msg_type = value
        .get("msg_type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing msg_type".into()))?
        .to_string();

    if let Some(kind) = MediaKind::from_msg_type(&msg_type) {
        let message: MediaMessage = serde_json::from_value(value)
            .map_err(|e| ProtocolError::Malformed(format!("{msg_type}: {e}")))?;
        return media_from_json(kind, message.content).map(Inbound::Media);
    }

    if SignalingMessage::is_known(&msg_type) {
        return match serde_json::from_value(value.clone()) {
            Ok(message) => Ok(Inbound::Signaling(message)),
            // A garbled handshake answer still ends the handshake, as a rejection
            Err(_) if msg_type == "SIGNALING_HAND_SHAKE_RESP" => Ok(Inbound::Signaling(
                SignalingMessage::HandshakeResponse(lenient_handshake_response(&value)),
            )),
            Err(e) => Err(ProtocolError::Malformed(format!("{msg_type}: {e}"))),
        };
    }

    Err(ProtocolError::UnknownMessageType(msg_type))
}

/// Decode a binary media frame.
///
/// # Errors
///
/// Any codec failure, see [`decode_frame`]
pub fn decode_binary(data: &[u8]) -> Result<Inbound, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(data);
    decode_frame(&mut buf).map(Inbound::Media)
}

/// Encode a media frame as a JSON media message.
///
/// # Errors
///
/// Returns `Malformed` if serialization fails
pub fn encode_media_text(frame: &MediaFrame) -> Result<String, ProtocolError> {
    let message = MediaMessage {
        msg_type: frame.kind.msg_type().to_string(),
        content: MediaContent {
            user_id: frame.metadata.user_id,
            user_name: frame.metadata.user_name.clone(),
            data: STANDARD.encode(&frame.payload),
            timestamp: frame.timestamp,
            track_id: frame.track_id.clone(),
        },
    };
    serde_json::to_string(&message).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Salvage what can be read from a handshake response that does not fit
/// its schema. It never counts as acceptance: a rejection code is kept,
/// anything else is left unset.
fn lenient_handshake_response(value: &Value) -> HandshakeResponse {
    let text = |field: &str| value.get(field).and_then(Value::as_str).map(str::to_string);
    HandshakeResponse {
        status_code: value
            .get("status_code")
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .filter(|&code| code != STATUS_OK),
        reason: text("reason"),
        media_server: text("media_server"),
    }
}

fn media_from_json(kind: MediaKind, content: MediaContent) -> Result<MediaFrame, ProtocolError> {
    let payload = STANDARD
        .decode(content.data.as_bytes())
        .map_err(|e| ProtocolError::Malformed(format!("{}: bad base64: {e}", kind.msg_type())))?;

    let mut frame = MediaFrame::new(
        kind,
        payload,
        content.timestamp,
        SenderMetadata::new(content.user_name, content.user_id),
    );
    frame.track_id = content.track_id;
    Ok(frame)
}
