//! RTMS Client Library
//!
//! Protocol core for receiving real-time media streams (RTMS):
//!
//! - HMAC-SHA256 handshake signatures from a client ID and secret
//! - WebSocket transport with ordered candidate URLs and custom CA bundles
//! - Signaling state machine covering handshake, keepalive, interruption and
//!   termination
//! - Media demultiplexing to per-kind callbacks
//! - A poll driver that pumps all of the above at a bounded cadence
//!
//! # Architecture
//!
//! ```text
//! Client (one per meeting stream)
//! ├── Transport        (I/O task, unbounded FIFO to the driver)
//! ├── SignalingMachine (no I/O, no clock, fed by the driver)
//! ├── Demultiplexer    (single-slot callbacks, panic isolation)
//! └── poll driver      (tokio task or manual `Client::poll`)
//! ```
//!
//! Every state transition and callback of one client happens on its driver
//! tick under one lock. Clients are independent; [`global`] keeps one in a
//! process-wide slot for single-stream hosts.
//!
//! # Modules
//!
//! - [`client`] - The [`Client`] facade
//! - [`config`] - Environment configuration, join parameters, media settings
//! - [`errors`] - Error type and SDK status codes
//! - [`signaling`] - Stream state machine
//! - [`transport`] - Connection abstraction and the WebSocket implementation

#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod demux;
mod driver;
pub mod errors;
pub mod global;
pub mod session;
pub mod signaling;
pub mod signature;
pub mod transport;

pub use client::Client;
pub use config::{Config, JoinParams, MediaConfig};
pub use errors::{status, RtmsError};
pub use session::{Participant, SessionInfo, SessionStatus};
pub use signaling::SignalingState;

pub use rtms_protocol::signaling::{AudioParams, DeskshareParams, VideoParams};
pub use rtms_protocol::{MediaFrame, MediaKind, MediaTypes, SenderMetadata, SessionEvent, UserEvent};
