//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each connection runs one I/O task that owns the socket. Outbound text is
//! handed to the task over a channel; inbound frames flow back over an
//! unbounded FIFO channel that the poll driver drains.

use super::{ConnectOptions, Connector, Transport, TransportEvent};
use crate::errors::RtmsError;
use async_trait::async_trait;
use common::types::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a local close waits for the close frame to go out.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects over `ws://` or `wss://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        urls: &[String],
        options: &ConnectOptions,
    ) -> Result<Box<dyn Transport>, RtmsError> {
        if urls.is_empty() {
            return Err(RtmsError::InvalidArgs("no server URL supplied".to_string()));
        }

        let deadline = Instant::now() + options.timeout;
        let tls = if urls.iter().any(|url| url.starts_with("wss:")) {
            match options.ca_path.as_deref() {
                Some(path) => Some(load_tls_config(path)?),
                None => {
                    warn!(
                        target: "rtms.transport",
                        "No CA bundle found, using bundled web PKI roots"
                    );
                    None
                }
            }
        } else {
            None
        };

        let mut last_error = None;
        let mut timed_out = false;
        for (index, candidate) in urls.iter().enumerate() {
            let url = match Url::parse(candidate) {
                Ok(url) if matches!(url.scheme(), "ws" | "wss") => url,
                Ok(url) => {
                    warn!(
                        target: "rtms.transport",
                        url = %candidate,
                        scheme = %url.scheme(),
                        "Skipping server URL with unsupported scheme"
                    );
                    last_error = Some(format!("{candidate}: unsupported scheme"));
                    continue;
                }
                Err(e) => {
                    warn!(
                        target: "rtms.transport",
                        url = %candidate,
                        error = %e,
                        "Skipping unparsable server URL"
                    );
                    last_error = Some(format!("{candidate}: {e}"));
                    continue;
                }
            };

            let attempt = tokio_tungstenite::connect_async_tls_with_config(
                url.as_str(),
                None,
                true,
                tls.clone().map(tokio_tungstenite::Connector::Rustls),
            );

            // Each candidate gets an equal share of what is left of the deadline
            let now = Instant::now();
            if now >= deadline {
                timed_out = true;
                break;
            }
            let remaining_candidates = u32::try_from(urls.len() - index).unwrap_or(u32::MAX);
            let attempt_deadline = now + (deadline - now) / remaining_candidates;

            match tokio::time::timeout_at(attempt_deadline, attempt).await {
                Err(_) => {
                    warn!(
                        target: "rtms.transport",
                        url = %candidate,
                        budget = ?attempt_deadline.saturating_duration_since(now),
                        "Connect attempt timed out, trying next candidate"
                    );
                    last_error = Some(format!("connect to {candidate}: attempt timed out"));
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rtms.transport",
                        url = %candidate,
                        error = %e,
                        "Connect attempt failed, trying next candidate"
                    );
                    last_error = Some(format!("{candidate}: {e}"));
                }
                Ok(Ok((ws_stream, _response))) => {
                    return Ok(Box::new(WebSocketTransport::spawn(ws_stream, candidate)));
                }
            }
        }

        let detail = last_error.unwrap_or_else(|| "no usable server URL".to_string());
        if timed_out || Instant::now() >= deadline {
            warn!(
                target: "rtms.transport",
                timeout = ?options.timeout,
                "Connect deadline expired"
            );
            return Err(RtmsError::TimedOut(detail));
        }
        Err(RtmsError::ConnectFailed(detail))
    }
}

/// Build a rustls client config trusting only the certificates in `path`.
fn load_tls_config(path: &Path) -> Result<Arc<rustls::ClientConfig>, RtmsError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| RtmsError::Tls(format!("{}: {e}", path.display())))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RtmsError::Tls(format!("{}: {e}", path.display())))?;

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(RtmsError::Tls(format!(
            "{}: no usable certificates",
            path.display()
        )));
    }
    debug!(
        target: "rtms.transport",
        ca_path = %path.display(),
        added,
        ignored,
        "Loaded CA bundle"
    );

    let config =
        rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| RtmsError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

    Ok(Arc::new(config))
}

/// An established WebSocket connection.
pub struct WebSocketTransport {
    connection_id: ConnectionId,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
    /// Cleared by `close()` or once `Disconnected` has been drained, never
    /// by the I/O task, so frames queued ahead of a drop are handled on a
    /// writable transport.
    open: bool,
    cancel_token: CancellationToken,
}

impl WebSocketTransport {
    fn spawn(ws_stream: WsStream, url: &str) -> Self {
        let connection_id = ConnectionId::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        info!(
            target: "rtms.transport",
            connection_id = %connection_id,
            url = %url,
            "WebSocket connected"
        );

        tokio::spawn(run_io(
            ws_stream,
            connection_id,
            outbound_rx,
            inbound_tx,
            cancel_token.clone(),
        ));

        Self {
            connection_id,
            outbound: outbound_tx,
            inbound: inbound_rx,
            open: true,
            cancel_token,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Transport for WebSocketTransport {
    fn send_text(&mut self, text: String) -> Result<(), RtmsError> {
        if !self.open {
            return Err(RtmsError::NotConnected);
        }
        if self.outbound.send(Message::Text(text.into())).is_err() {
            // I/O task is gone; its Disconnected event is still queued
            trace!(
                target: "rtms.transport",
                connection_id = %self.connection_id,
                "Discarding send on a dropped connection"
            );
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Option<TransportEvent> {
        if !self.open {
            return None;
        }
        let event = self.inbound.try_recv().ok();
        if matches!(event, Some(TransportEvent::Disconnected(_))) {
            self.open = false;
        }
        event
    }

    fn close(&mut self) {
        if !self.cancel_token.is_cancelled() {
            debug!(
                target: "rtms.transport",
                connection_id = %self.connection_id,
                "Closing WebSocket"
            );
            self.open = false;
            self.cancel_token.cancel();
        }
    }

    fn is_connected(&self) -> bool {
        self.open
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Socket I/O loop. Ends on local close, remote close, or error.
async fn run_io(
    ws_stream: WsStream,
    connection_id: ConnectionId,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    cancel_token: CancellationToken,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let disconnect_reason = loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, ws_sink.send(Message::Close(None))).await;
                break None;
            }

            message = outbound.recv() => {
                let Some(message) = message else {
                    break None;
                };
                if let Err(e) = ws_sink.send(message).await {
                    break Some(format!("send failed: {e}"));
                }
            }

            frame = ws_stream.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => TransportEvent::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => TransportEvent::Binary(data),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            break Some(format!("pong failed: {e}"));
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break Some(frame.map_or_else(
                            || "closed by server".to_string(),
                            |f| format!("closed by server: {} {}", f.code, f.reason.as_str()),
                        ));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break Some("connection reset".to_string()),
                };

                trace!(target: "rtms.transport", connection_id = %connection_id, "Frame received");
                if inbound.send(event).is_err() {
                    // Owner dropped the transport
                    break None;
                }
            }
        }
    };

    match disconnect_reason {
        Some(reason) => {
            info!(
                target: "rtms.transport",
                connection_id = %connection_id,
                reason = %reason,
                "WebSocket disconnected"
            );
            let _ = inbound.send(TransportEvent::Disconnected(reason));
        }
        None => {
            debug!(
                target: "rtms.transport",
                connection_id = %connection_id,
                "WebSocket I/O task stopped"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rtms_test_utils::{fixtures, MockRtmsServer};
    use tokio::net::TcpListener;

    /// Accepts TCP but never answers the WebSocket upgrade.
    async fn silent_listener() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("ws://{addr}")
    }

    async fn next_event(transport: &mut dyn Transport) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(event) = transport.try_recv() {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no transport event")
    }

    fn options(timeout: Duration) -> ConnectOptions {
        ConnectOptions {
            timeout,
            ca_path: None,
        }
    }

    #[tokio::test]
    async fn test_empty_url_list_is_invalid() {
        let result = WebSocketConnector.connect(&[], &options(Duration::from_secs(1))).await;
        assert!(matches!(result, Err(RtmsError::InvalidArgs(_))));
    }

    #[tokio::test]
    async fn test_all_candidates_refused() {
        // Grab a free port, then release it so nothing listens there
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let urls = vec!["http://example.invalid".to_string(), format!("ws://{addr}")];
        let result = WebSocketConnector
            .connect(&urls, &options(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(RtmsError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_deadline() {
        let urls = vec![silent_listener().await];
        let result = WebSocketConnector
            .connect(&urls, &options(Duration::from_millis(200)))
            .await;
        assert!(matches!(result, Err(RtmsError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_stalled_candidate_falls_back_to_next() {
        let server = MockRtmsServer::accepting().await.unwrap();
        let urls = vec![silent_listener().await, server.url()];

        let transport = WebSocketConnector
            .connect(&urls, &options(Duration::from_millis(1000)))
            .await
            .unwrap();

        assert!(transport.is_connected());
        server.wait_for_connections(1).await.unwrap();
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_writable_until_disconnect_is_drained() {
        let server = MockRtmsServer::accepting().await.unwrap();
        let mut transport = WebSocketConnector
            .connect(&[server.url()], &options(Duration::from_secs(5)))
            .await
            .unwrap();
        server.wait_for_connections(1).await.unwrap();

        server.send_json(&fixtures::keepalive_request(1)).unwrap();
        server.close_connection().unwrap();

        let first = next_event(&mut *transport).await;
        assert!(matches!(first, TransportEvent::Text(_)));

        // Give the I/O task time to see the close frame and exit
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(transport.is_connected());
        assert!(transport.send_text("{}".to_string()).is_ok());

        let second = next_event(&mut *transport).await;
        assert!(matches!(second, TransportEvent::Disconnected(_)));
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send_text("{}".to_string()),
            Err(RtmsError::NotConnected)
        ));
        assert!(transport.try_recv().is_none());
    }

    #[test]
    fn test_unreadable_ca_bundle() {
        let missing = std::env::temp_dir().join(format!("rtms-missing-{}.pem", std::process::id()));
        assert!(matches!(load_tls_config(&missing), Err(RtmsError::Tls(_))));

        let empty = std::env::temp_dir().join(format!("rtms-empty-{}.pem", std::process::id()));
        std::fs::write(&empty, "not a certificate\n").unwrap();
        let result = load_tls_config(&empty);
        let _ = std::fs::remove_file(&empty);
        assert!(matches!(result, Err(RtmsError::Tls(_))));
    }
}
