//! In-memory loopback transport for tests.
//!
//! A [`MockPeer`] plays the server: it queues inbound events for the client
//! and records everything the client sends. [`MockConnector`] hands out
//! transports bound to the same peer, so reconnects reuse it.

use super::{ConnectOptions, Connector, Transport, TransportEvent};
use crate::errors::RtmsError;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct PeerState {
    inbound: VecDeque<TransportEvent>,
    sent: Vec<String>,
    connected: bool,
    close_calls: usize,
    fail_sends: bool,
}

/// Server side of the loopback.
#[derive(Debug, Clone, Default)]
pub struct MockPeer {
    state: Arc<Mutex<PeerState>>,
}

impl MockPeer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a text frame for the client.
    pub fn push_text(&self, text: impl Into<String>) {
        self.lock().inbound.push_back(TransportEvent::Text(text.into()));
    }

    /// Queue a JSON value as a text frame.
    pub fn push_json(&self, value: &Value) {
        self.push_text(value.to_string());
    }

    /// Queue a binary frame for the client.
    pub fn push_binary(&self, data: impl Into<Bytes>) {
        self.lock()
            .inbound
            .push_back(TransportEvent::Binary(data.into()));
    }

    /// Simulate the connection dropping.
    ///
    /// Frames queued before the drop are still delivered; the client side
    /// stays writable until it drains the `Disconnected` event.
    pub fn disconnect(&self, reason: impl Into<String>) {
        self.lock()
            .inbound
            .push_back(TransportEvent::Disconnected(reason.into()));
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Raw text the client has sent.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Sent messages parsed as JSON. Unparsable entries become `Value::Null`.
    #[must_use]
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap_or(Value::Null))
            .collect()
    }

    /// Sent messages whose `msg_type` equals `msg_type`.
    #[must_use]
    pub fn sent_of_type(&self, msg_type: &str) -> Vec<Value> {
        self.sent_json()
            .into_iter()
            .filter(|value| value.get("msg_type").and_then(Value::as_str) == Some(msg_type))
            .collect()
    }

    /// Forget recorded sends.
    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Number of `close()` calls that actually closed a live connection.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.lock().close_calls
    }

    /// Inbound events not yet drained by the client.
    #[must_use]
    pub fn pending_inbound(&self) -> usize {
        self.lock().inbound.len()
    }

    /// A client-side transport bound to this peer.
    #[must_use]
    pub fn transport(&self) -> MockTransport {
        self.lock().connected = true;
        MockTransport {
            peer: self.clone(),
            closed: false,
            dropped: false,
        }
    }
}

/// Client side of the loopback.
#[derive(Debug)]
pub struct MockTransport {
    peer: MockPeer,
    closed: bool,
    /// `Disconnected` has been drained
    dropped: bool,
}

impl Transport for MockTransport {
    fn send_text(&mut self, text: String) -> Result<(), RtmsError> {
        let mut state = self.peer.lock();
        if self.closed || self.dropped || state.fail_sends {
            return Err(RtmsError::NotConnected);
        }
        state.sent.push(text);
        Ok(())
    }

    fn try_recv(&mut self) -> Option<TransportEvent> {
        if self.closed || self.dropped {
            return None;
        }
        let mut state = self.peer.lock();
        let event = state.inbound.pop_front();
        if matches!(event, Some(TransportEvent::Disconnected(_))) {
            self.dropped = true;
            state.connected = false;
        }
        event
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.peer.lock();
            state.connected = false;
            state.close_calls += 1;
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed && !self.dropped
    }
}

/// Connector producing [`MockTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    peer: MockPeer,
    refuse: Arc<Mutex<Option<RtmsError>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    #[must_use]
    pub fn new(peer: MockPeer) -> Self {
        Self {
            peer,
            ..Self::default()
        }
    }

    /// Fail the next connect with `error`.
    pub fn refuse_next(&self, error: RtmsError) {
        *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        urls: &[String],
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Transport>, RtmsError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if urls.is_empty() {
            return Err(RtmsError::InvalidArgs("no server URL supplied".to_string()));
        }
        let refusal = self
            .refuse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = refusal {
            return Err(error);
        }
        Ok(Box::new(self.peer.transport()))
    }
}
