//! Wire protocol for RTMS real-time media streams.
//!
//! Control traffic is JSON tagged by `msg_type`; media arrives either as
//! binary frames (see [`codec`]) or as JSON media messages carrying base64
//! payloads. [`message::decode_text`] and [`message::decode_binary`] turn both
//! into a single [`message::Inbound`] value for the client state machine.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod signaling;
pub mod stream;

pub use error::ProtocolError;
pub use frame::{MediaFrame, MediaKind, MediaTypes, SenderMetadata};
pub use message::{decode_binary, decode_text, Inbound};
pub use signaling::SignalingMessage;
pub use stream::{SessionEvent, StreamState, UserEvent};
