//! Mock RTMS signaling server.
//!
//! A scripted WebSocket server on `127.0.0.1:0` that speaks just enough of
//! the RTMS protocol to drive the client end to end:
//! - Answers `SIGNALING_HAND_SHAKE_REQ` with a configurable status code, or
//!   not at all
//! - Optionally verifies the handshake signature
//! - Answers `KEEP_ALIVE_REQ` sent by the client
//! - Records every text message it receives
//! - Pushes control messages and media frames to the current connection on
//!   demand
//!
//! # Example
//!
//! ```rust,ignore
//! use rtms_test_utils::MockRtmsServer;
//!
//! let server = MockRtmsServer::builder().handshake_status(0).start().await?;
//! client.join(JoinParams::new("m1", "s1", server.url())).await?;
//! server.wait_for("CLIENT_READY_ACK", 1).await?;
//! ```

use crate::fixtures;
use anyhow::{anyhow, Context};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rtms_protocol::codec::encode_frame;
use rtms_protocol::message::encode_media_text;
use rtms_protocol::MediaFrame;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// How long [`MockRtmsServer::wait_for`] waits by default.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct ServerState {
    received: Vec<Value>,
    connections: usize,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

#[derive(Debug, Clone)]
struct Script {
    handshake_status: Option<i32>,
    credentials: Option<(String, String)>,
    answer_keepalive: bool,
}

/// Running mock server. Shuts down on drop.
#[derive(Debug)]
pub struct MockRtmsServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    cancel_token: CancellationToken,
}

impl MockRtmsServer {
    /// Create a new server builder.
    #[must_use]
    pub fn builder() -> MockRtmsServerBuilder {
        MockRtmsServerBuilder::default()
    }

    /// Start a server that accepts every handshake.
    pub async fn accepting() -> anyhow::Result<Self> {
        Self::builder().handshake_status(0).start().await
    }

    /// `ws://` URL of this server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Every text message received so far, parsed as JSON.
    #[must_use]
    pub fn received(&self) -> Vec<Value> {
        self.lock().received.clone()
    }

    /// Received messages with the given `msg_type`.
    #[must_use]
    pub fn received_of_type(&self, msg_type: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|value| value.get("msg_type").and_then(Value::as_str) == Some(msg_type))
            .collect()
    }

    /// Number of WebSocket connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Wait until at least `count` messages of `msg_type` have arrived.
    pub async fn wait_for(&self, msg_type: &str, count: usize) -> anyhow::Result<Vec<Value>> {
        self.wait_for_within(msg_type, count, DEFAULT_WAIT).await
    }

    /// [`wait_for`](Self::wait_for) with an explicit deadline.
    pub async fn wait_for_within(
        &self,
        msg_type: &str,
        count: usize,
        timeout: Duration,
    ) -> anyhow::Result<Vec<Value>> {
        let poll = async {
            loop {
                let matching = self.received_of_type(msg_type);
                if matching.len() >= count {
                    return matching;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .with_context(|| format!("waiting for {count} x {msg_type}"))
    }

    /// Wait until `count` connections have been accepted.
    pub async fn wait_for_connections(&self, count: usize) -> anyhow::Result<()> {
        let poll = async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(DEFAULT_WAIT, poll)
            .await
            .with_context(|| format!("waiting for {count} connections"))
    }

    fn send(&self, message: Message) -> anyhow::Result<()> {
        let outbound = self
            .lock()
            .outbound
            .clone()
            .ok_or_else(|| anyhow!("no client connected"))?;
        outbound
            .send(message)
            .map_err(|_| anyhow!("client connection closed"))
    }

    /// Send a JSON text message to the current connection.
    pub fn send_json(&self, value: &Value) -> anyhow::Result<()> {
        self.send(Message::Text(value.to_string().into()))
    }

    /// Send raw text to the current connection.
    pub fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.send(Message::Text(text.to_string().into()))
    }

    /// Send a media frame in the binary encoding.
    pub fn send_media(&self, frame: &MediaFrame) -> anyhow::Result<()> {
        let data = encode_frame(frame)?;
        self.send(Message::Binary(data))
    }

    /// Send a media frame as a JSON media message.
    pub fn send_media_json(&self, frame: &MediaFrame) -> anyhow::Result<()> {
        let text = encode_media_text(frame)?;
        self.send_text(&text)
    }

    /// Send arbitrary bytes as a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> anyhow::Result<()> {
        self.send(Message::Binary(data.into()))
    }

    /// Close the current connection with a normal close frame.
    pub fn close_connection(&self) -> anyhow::Result<()> {
        self.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "server closing".into(),
        })))
    }

    /// Stop accepting and drop every connection.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for MockRtmsServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Builder for [`MockRtmsServer`].
#[derive(Debug, Clone)]
pub struct MockRtmsServerBuilder {
    script: Script,
}

impl Default for MockRtmsServerBuilder {
    fn default() -> Self {
        Self {
            script: Script {
                handshake_status: Some(0),
                credentials: None,
                answer_keepalive: true,
            },
        }
    }
}

impl MockRtmsServerBuilder {
    /// Answer handshakes with this `status_code`.
    #[must_use]
    pub fn handshake_status(mut self, status_code: i32) -> Self {
        self.script.handshake_status = Some(status_code);
        self
    }

    /// Never answer handshakes.
    #[must_use]
    pub fn silent_handshake(mut self) -> Self {
        self.script.handshake_status = None;
        self
    }

    /// Reject handshakes whose signature does not match these credentials.
    #[must_use]
    pub fn verify_signature(mut self, client_id: &str, secret: &str) -> Self {
        self.script.credentials = Some((client_id.to_string(), secret.to_string()));
        self
    }

    /// Do not answer the client's own keepalive requests.
    #[must_use]
    pub fn ignore_keepalive(mut self) -> Self {
        self.script.answer_keepalive = false;
        self
    }

    /// Bind to an ephemeral port and start accepting.
    pub async fn start(self) -> anyhow::Result<MockRtmsServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState::default()));
        let cancel_token = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&state),
            self.script,
            cancel_token.clone(),
        ));

        Ok(MockRtmsServer {
            addr,
            state,
            cancel_token,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<Mutex<ServerState>>,
    script: Script,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { break };
                tokio::spawn(handle_connection(
                    stream,
                    Arc::clone(&state),
                    script.clone(),
                    cancel_token.child_token(),
                ));
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<ServerState>>,
    script: Script,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    {
        let mut state = state.lock().unwrap();
        state.connections += 1;
        // Newest connection receives pushed messages
        state.outbound = Some(tx.clone());
    }

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            outgoing = rx.recv() => {
                let Some(message) = outgoing else { break };
                let closing = matches!(message, Message::Close(_));
                write.send(message).await?;
                if closing {
                    break;
                }
            }
            incoming = read.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if let Some(reply) = scripted_reply(&script, &value) {
                    write.send(Message::Text(reply.to_string().into())).await?;
                }
                state.lock().unwrap().received.push(value);
            }
        }
    }

    let _ = write.close().await;
    Ok(())
}

fn scripted_reply(script: &Script, request: &Value) -> Option<Value> {
    match request.get("msg_type").and_then(Value::as_str)? {
        "SIGNALING_HAND_SHAKE_REQ" => {
            let status_code = script.handshake_status?;
            if let Some((client_id, secret)) = &script.credentials {
                let field = |name: &str| request.get(name).and_then(Value::as_str).unwrap_or("");
                let expected = fixtures::signature_for(
                    client_id,
                    secret,
                    field("meeting_uuid"),
                    field("rtms_stream_id"),
                );
                if field("signature") != expected {
                    return Some(fixtures::handshake_response_with_reason(
                        fixtures::STATUS_INVALID_ARGS,
                        "signature mismatch",
                    ));
                }
            }
            Some(fixtures::handshake_response(status_code))
        }
        "KEEP_ALIVE_REQ" if script.answer_keepalive => Some(fixtures::keepalive_response(
            request.get("timestamp").and_then(Value::as_u64),
        )),
        _ => None,
    }
}
