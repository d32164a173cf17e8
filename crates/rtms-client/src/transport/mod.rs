//! Connection transport.
//!
//! A [`Transport`] is one established duplex connection. Inbound traffic is
//! queued in arrival order by the I/O side and drained by the poll driver
//! through [`Transport::try_recv`]; the queue is unbounded so a slow
//! consumer delays ticks but never loses frames. A [`Connector`] opens a
//! transport against the first reachable URL in a candidate list. Neither
//! layer retries on its own.

pub mod websocket;

#[cfg(test)]
pub mod mock;

use crate::errors::RtmsError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;

pub use websocket::{WebSocketConnector, WebSocketTransport};

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Binary(Bytes),
    /// The connection ended for a reason other than a local `close()`.
    Disconnected(String),
}

/// One established connection.
pub trait Transport: Send {
    /// Queue a text message for sending.
    ///
    /// # Errors
    ///
    /// Returns `RtmsError::NotConnected` once the connection has ended.
    fn send_text(&mut self, text: String) -> Result<(), RtmsError>;

    /// Next queued inbound event, if any.
    fn try_recv(&mut self) -> Option<TransportEvent>;

    /// Close the connection. Idempotent; never blocks and abandons pending sends.
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Options for one connection attempt.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Overall deadline across every candidate URL.
    pub timeout: Duration,
    /// CA bundle for `wss://` URLs. `None` uses the bundled web PKI roots.
    pub ca_path: Option<PathBuf>,
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the first URL in `urls` that accepts.
    ///
    /// # Errors
    ///
    /// - `RtmsError::TimedOut` if the deadline passes first
    /// - `RtmsError::ConnectFailed` if every candidate refused
    /// - `RtmsError::Tls` if the CA bundle is unusable
    async fn connect(
        &self,
        urls: &[String],
        options: &ConnectOptions,
    ) -> Result<Box<dyn Transport>, RtmsError>;
}
