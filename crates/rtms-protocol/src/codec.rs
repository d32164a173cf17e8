//! Codec for encoding and decoding binary media frames.

use crate::error::ProtocolError;
use crate::frame::{MediaFrame, MediaKind, SenderMetadata};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encode a media frame to bytes
///
/// # Errors
///
/// Returns an error if a variable-length field does not fit its length prefix
pub fn encode_frame(frame: &MediaFrame) -> Result<Bytes, ProtocolError> {
    let user_name = frame.metadata.user_name.as_bytes();
    let track_id = frame.track_id.as_deref().unwrap_or_default().as_bytes();

    let user_name_len = u16::try_from(user_name.len())
        .map_err(|_| ProtocolError::InvalidFormat("user name too long".into()))?;
    let track_id_len = u16::try_from(track_id.len())
        .map_err(|_| ProtocolError::InvalidFormat("track id too long".into()))?;
    let payload_len = u32::try_from(frame.payload.len())
        .map_err(|_| ProtocolError::InvalidFormat("payload too long".into()))?;

    let total_len =
        MediaFrame::HEADER_SIZE + user_name.len() + track_id.len() + frame.payload.len();
    let mut buf = BytesMut::with_capacity(total_len);

    // Version (1 byte)
    buf.put_u8(frame.version);

    // Media Kind (1 byte)
    buf.put_u8(frame.kind as u8);

    // Timestamp (8 bytes)
    buf.put_u64(frame.timestamp);

    // User ID (4 bytes)
    buf.put_u32(frame.metadata.user_id);

    // Lengths (2 + 2 + 4 bytes)
    buf.put_u16(user_name_len);
    buf.put_u16(track_id_len);
    buf.put_u32(payload_len);

    buf.extend_from_slice(user_name);
    buf.extend_from_slice(track_id);
    buf.extend_from_slice(&frame.payload);

    Ok(buf.freeze())
}

/// Decode a media frame from bytes
///
/// # Errors
///
/// Returns an error if the header is truncated, the version or media kind is
/// unknown, a variable-length section is shorter than announced, or a text
/// field is not UTF-8
pub fn decode_frame(data: &mut impl Buf) -> Result<MediaFrame, ProtocolError> {
    // Check if we have enough data for the header
    if data.remaining() < MediaFrame::HEADER_SIZE {
        return Err(ProtocolError::InsufficientData);
    }

    // Version (1 byte)
    let version = data.get_u8();
    if version != MediaFrame::VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    // Media Kind (1 byte)
    let tag = data.get_u8();
    let kind = MediaKind::from_tag(tag).ok_or(ProtocolError::InvalidMediaKind(tag))?;

    // Timestamp (8 bytes)
    let timestamp = data.get_u64();

    // User ID (4 bytes)
    let user_id = data.get_u32();

    let user_name_len = usize::from(data.get_u16());
    let track_id_len = usize::from(data.get_u16());
    let payload_len = data.get_u32() as usize;

    // Check if we have enough data for the variable sections
    if data.remaining() < user_name_len + track_id_len + payload_len {
        return Err(ProtocolError::InsufficientData);
    }

    let user_name = read_utf8(data, user_name_len, "user name")?;
    let track_id = if track_id_len == 0 {
        None
    } else {
        Some(read_utf8(data, track_id_len, "track id")?)
    };

    let payload = data.copy_to_bytes(payload_len);

    Ok(MediaFrame {
        version,
        kind,
        timestamp,
        metadata: SenderMetadata { user_name, user_id },
        track_id,
        payload,
    })
}

fn read_utf8(data: &mut impl Buf, len: usize, field: &str) -> Result<String, ProtocolError> {
    let raw = data.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| ProtocolError::InvalidFormat(format!("{field} is not valid UTF-8")))
}
