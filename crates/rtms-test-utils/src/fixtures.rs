//! Pre-configured test data for RTMS client tests.
//!
//! Provides:
//! - Credentials and the matching handshake signature
//! - Server-to-client control messages as JSON values
//! - Media frames with realistic sender metadata

use rtms_protocol::{MediaFrame, MediaKind, SenderMetadata};
use ring::hmac;
use serde_json::{json, Value};
use uuid::Uuid;

/// Client ID used across tests.
pub const TEST_CLIENT_ID: &str = "test-client";

/// Client secret used across tests.
pub const TEST_SECRET: &str = "test-secret";

/// `INVALID_ARGS` status code.
pub const STATUS_INVALID_ARGS: i32 = 5;

/// Meeting and stream identifiers for one test.
#[derive(Debug, Clone)]
pub struct TestStream {
    pub meeting_uuid: String,
    pub stream_id: String,
}

impl TestStream {
    #[must_use]
    pub fn new(meeting_uuid: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            meeting_uuid: meeting_uuid.into(),
            stream_id: stream_id.into(),
        }
    }

    /// Create a stream with random identifiers.
    #[must_use]
    pub fn random() -> Self {
        Self::new(
            format!("meeting-{}", Uuid::new_v4()),
            format!("stream-{}", Uuid::new_v4()),
        )
    }

    /// Signature for this stream under the test credentials.
    #[must_use]
    pub fn signature(&self) -> String {
        signature_for(TEST_CLIENT_ID, TEST_SECRET, &self.meeting_uuid, &self.stream_id)
    }
}

/// `hex(HMAC-SHA256(secret, "{client_id},{meeting_uuid},{stream_id}"))`.
#[must_use]
pub fn signature_for(client_id: &str, secret: &str, meeting_uuid: &str, stream_id: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let message = format!("{client_id},{meeting_uuid},{stream_id}");
    hex::encode(hmac::sign(&key, message.as_bytes()).as_ref())
}

/// A client handshake request.
#[must_use]
pub fn handshake_request(meeting_uuid: &str, stream_id: &str, signature: &str) -> Value {
    json!({
        "msg_type": "SIGNALING_HAND_SHAKE_REQ",
        "protocol_version": 1,
        "sequence": 0,
        "meeting_uuid": meeting_uuid,
        "rtms_stream_id": stream_id,
        "signature": signature,
    })
}

#[must_use]
pub fn handshake_response(status_code: i32) -> Value {
    json!({
        "msg_type": "SIGNALING_HAND_SHAKE_RESP",
        "status_code": status_code,
    })
}

#[must_use]
pub fn handshake_response_with_reason(status_code: i32, reason: &str) -> Value {
    json!({
        "msg_type": "SIGNALING_HAND_SHAKE_RESP",
        "status_code": status_code,
        "reason": reason,
    })
}

#[must_use]
pub fn keepalive_request(timestamp: u64) -> Value {
    json!({"msg_type": "KEEP_ALIVE_REQ", "timestamp": timestamp})
}

#[must_use]
pub fn keepalive_response(timestamp: Option<u64>) -> Value {
    match timestamp {
        Some(timestamp) => json!({"msg_type": "KEEP_ALIVE_RESP", "timestamp": timestamp}),
        None => json!({"msg_type": "KEEP_ALIVE_RESP"}),
    }
}

/// `STREAM_STATE_UPDATE`; `state` is the wire name, e.g. `"INTERRUPTED"`.
#[must_use]
pub fn stream_state(state: &str, reason: Option<i32>) -> Value {
    match reason {
        Some(reason) => json!({"msg_type": "STREAM_STATE_UPDATE", "state": state, "reason": reason}),
        None => json!({"msg_type": "STREAM_STATE_UPDATE", "state": state}),
    }
}

/// `SESSION_STATE_UPDATE`; `state` is one of `ADD`, `STOP`, `PAUSE`, `RESUME`.
#[must_use]
pub fn session_state(state: &str, session_id: &str) -> Value {
    json!({
        "msg_type": "SESSION_STATE_UPDATE",
        "state": state,
        "session_id": session_id,
        "start_time": 1_700_000_000,
    })
}

#[must_use]
pub fn user_joined(user_id: u32, user_name: &str) -> Value {
    json!({"msg_type": "EVENT_UPDATE", "event": "USER_JOIN", "user_id": user_id, "user_name": user_name})
}

#[must_use]
pub fn user_left(user_id: u32) -> Value {
    json!({"msg_type": "EVENT_UPDATE", "event": "USER_LEAVE", "user_id": user_id})
}

/// A media frame from a named sender.
#[must_use]
pub fn media_frame(kind: MediaKind, payload: &[u8], timestamp: u64, user: &str, user_id: u32) -> MediaFrame {
    MediaFrame::new(
        kind,
        payload.to_vec(),
        timestamp,
        SenderMetadata::new(user, user_id),
    )
}

/// Audio `[1, 2, 3]` at 1000 from Bob (7).
#[must_use]
pub fn bob_audio() -> MediaFrame {
    media_frame(MediaKind::Audio, &[1, 2, 3], 1000, "Bob", 7)
}
