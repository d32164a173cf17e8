//! Client facade.
//!
//! A [`Client`] owns one logical stream: the signaling machine, the current
//! transport, the demultiplexer and the poll driver. Independent clients
//! share nothing but process-wide configuration, so several meetings can be
//! streamed side by side.
//!
//! # Callbacks
//!
//! Callbacks run on the poll driver with the client lock released, one at a
//! time and in arrival order. A callback may call back into its own
//! `Client`, for example to `leave()` after a failed join; events raised
//! that way are delivered once the current callback returns. Callbacks
//! should still return promptly, since the next tick waits for them.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = Client::from_env()?;
//! client.on_join_confirm(|reason| println!("joined: {reason}"));
//! client.on_audio_data(|frame| println!("{} bytes", frame.size()));
//! client
//!     .join(JoinParams::new(meeting_uuid, stream_id, server_urls))
//!     .await?;
//! ```

use crate::config::{discover_ca, Config, JoinParams};
use crate::demux::{MediaCallback, MediaStats};
use crate::driver::{lock, run_poll_driver, Core, Shared, SharedCore};
use crate::errors::RtmsError;
use crate::session::{Participant, SessionInfo};
use crate::signaling::{SignalingMachine, SignalingState, Timeouts};
use crate::signature::resolve_signature;
use crate::transport::{ConnectOptions, Connector, WebSocketConnector};
use common::types::{ConnectionId, MeetingUuid, StreamId};
use rtms_protocol::signaling::{AudioParams, DeskshareParams, VideoParams};
use rtms_protocol::{MediaFrame, MediaKind, MediaTypes, SessionEvent, UserEvent};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle for one meeting stream.
pub struct Client {
    id: ConnectionId,
    config: Config,
    connector: Arc<dyn Connector>,
    core: SharedCore,
    /// Cancels the background poll driver, if one was spawned
    driver: Mutex<Option<CancellationToken>>,
}

impl Client {
    /// Create a client that connects over WebSocket.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Create a client with configuration loaded from the environment.
    ///
    /// # Errors
    ///
    /// Returns `RtmsError::Config` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, RtmsError> {
        Ok(Self::new(Config::from_env()?))
    }

    /// Create a client on a custom transport connector.
    #[must_use]
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            id: ConnectionId::new(),
            config,
            connector,
            core: Arc::new(Shared::new(Core::default())),
            driver: Mutex::new(None),
        }
    }

    /// Local identifier used in logs.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // --- Callback registration ---

    /// Handshake outcome: `OK` on success, otherwise the failure reason.
    pub fn on_join_confirm(&self, callback: impl FnMut(i32) + Send + 'static) {
        lock(&self.core).demux.set_join_confirm(Box::new(callback));
    }

    pub fn on_session_update(
        &self,
        callback: impl FnMut(SessionEvent, &SessionInfo) + Send + 'static,
    ) {
        lock(&self.core).demux.set_session_update(Box::new(callback));
    }

    pub fn on_user_update(&self, callback: impl FnMut(UserEvent, &Participant) + Send + 'static) {
        lock(&self.core).demux.set_user_update(Box::new(callback));
    }

    /// Receive audio. Also requests audio in the next handshake.
    pub fn on_audio_data(&self, callback: impl FnMut(&MediaFrame) + Send + 'static) {
        self.set_media_callback(MediaKind::Audio, Box::new(callback));
    }

    /// Receive video. Also requests video in the next handshake.
    pub fn on_video_data(&self, callback: impl FnMut(&MediaFrame) + Send + 'static) {
        self.set_media_callback(MediaKind::Video, Box::new(callback));
    }

    /// Receive screen share. Also requests it in the next handshake.
    pub fn on_deskshare_data(&self, callback: impl FnMut(&MediaFrame) + Send + 'static) {
        self.set_media_callback(MediaKind::Deskshare, Box::new(callback));
    }

    /// Receive transcripts. Also requests them in the next handshake.
    pub fn on_transcript_data(&self, callback: impl FnMut(&MediaFrame) + Send + 'static) {
        self.set_media_callback(MediaKind::Transcript, Box::new(callback));
    }

    /// Receive chat. Also requests chat in the next handshake.
    pub fn on_chat_data(&self, callback: impl FnMut(&MediaFrame) + Send + 'static) {
        self.set_media_callback(MediaKind::Chat, Box::new(callback));
    }

    /// Stream ended: `OK` for a local leave, otherwise the reason.
    pub fn on_leave(&self, callback: impl FnMut(i32) + Send + 'static) {
        lock(&self.core).demux.set_leave(Box::new(callback));
    }

    fn set_media_callback(&self, kind: MediaKind, callback: MediaCallback) {
        let mut core = lock(&self.core);
        core.demux.set_media(kind, callback);
        core.media.enable(kind);
    }

    // --- Media negotiation ---

    /// Replace the requested media kinds.
    pub fn set_media_types(&self, types: MediaTypes) {
        lock(&self.core).media.types = types;
    }

    pub fn set_audio_params(&self, params: AudioParams) {
        lock(&self.core).media.set_audio(params);
    }

    pub fn set_video_params(&self, params: VideoParams) {
        lock(&self.core).media.set_video(params);
    }

    pub fn set_deskshare_params(&self, params: DeskshareParams) {
        lock(&self.core).media.set_deskshare(params);
    }

    // --- Accessors ---

    #[must_use]
    pub fn meeting_uuid(&self) -> Option<MeetingUuid> {
        lock(&self.core)
            .machine
            .as_ref()
            .map(|machine| machine.meeting_uuid().clone())
    }

    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        lock(&self.core)
            .machine
            .as_ref()
            .map(|machine| machine.stream_id().clone())
    }

    /// Current stream state. `DISCONNECTED` before the first join.
    #[must_use]
    pub fn state(&self) -> SignalingState {
        lock(&self.core)
            .state()
            .unwrap_or(SignalingState::Disconnected)
    }

    #[must_use]
    pub fn session(&self) -> Option<SessionInfo> {
        lock(&self.core)
            .machine
            .as_ref()
            .and_then(|machine| machine.session().cloned())
    }

    /// Participants currently in the meeting, ordered by user ID.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        lock(&self.core)
            .machine
            .as_ref()
            .map(|machine| machine.participants().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn media_stats(&self, kind: MediaKind) -> MediaStats {
        lock(&self.core).demux.media_stats(kind)
    }

    /// Number of callback invocations that panicked.
    #[must_use]
    pub fn callback_failures(&self) -> u64 {
        lock(&self.core).demux.callback_failures()
    }

    // --- Lifecycle ---

    /// Connect and send the handshake.
    ///
    /// Returns once the handshake request is on the wire; its outcome is
    /// reported through `on_join_confirm`. Joining again while the stream is
    /// INTERRUPTED re-establishes it on a fresh connection.
    ///
    /// # Errors
    ///
    /// - `RtmsError::InvalidArgs` for a blank meeting UUID, stream ID or URL list
    /// - `RtmsError::MissingCredential` if no signature can be produced; no
    ///   connection is attempted
    /// - `RtmsError::InvalidState` if the client is already joined, or
    ///   `leave()` was called while connecting
    /// - any connect error from the transport
    pub async fn join(&self, params: JoinParams) -> Result<(), RtmsError> {
        if params.meeting_uuid.trim().is_empty() {
            return Err(RtmsError::InvalidArgs("meeting_uuid is required".to_string()));
        }
        if params.rtms_stream_id.trim().is_empty() {
            return Err(RtmsError::InvalidArgs(
                "rtms_stream_id is required".to_string(),
            ));
        }
        let urls = params.candidate_urls();
        if urls.is_empty() {
            return Err(RtmsError::InvalidArgs("server_urls is required".to_string()));
        }

        let signature = resolve_signature(&params, &self.config)?;
        let meeting_uuid = MeetingUuid::from(params.meeting_uuid.trim());
        let stream_id = StreamId::from(params.rtms_stream_id.trim());

        let epoch = {
            let core = lock(&self.core);
            check_joinable(&core, &meeting_uuid, &stream_id)?;
            core.leave_epoch
        };

        let timeout = params.timeout.unwrap_or(self.config.join_timeout);
        let options = ConnectOptions {
            timeout,
            ca_path: discover_ca(params.ca.as_deref(), self.config.ca_path.as_deref()),
        };

        info!(
            target: "rtms.client",
            client_id = %self.id,
            meeting_uuid = %meeting_uuid,
            stream_id = %stream_id,
            candidates = urls.len(),
            "Joining stream"
        );

        let mut transport = self
            .connector
            .connect(&urls, &options)
            .await
            .inspect_err(|e| {
                warn!(
                    target: "rtms.client",
                    client_id = %self.id,
                    stream_id = %stream_id,
                    error = %e,
                    "Connect failed"
                );
            })?;

        let mut core = self.core.lock_idle();
        if core.leave_epoch != epoch {
            transport.close();
            return Err(RtmsError::InvalidState(
                "left while connecting".to_string(),
            ));
        }
        if let Err(e) = check_joinable(&core, &meeting_uuid, &stream_id) {
            transport.close();
            return Err(e);
        }

        let now = Instant::now();
        if core.state() != Some(SignalingState::Interrupted) {
            let timeouts = Timeouts {
                handshake: timeout,
                keepalive: self.config.keepalive_timeout,
                interruption: self.config.interruption_timeout,
            };
            core.machine = Some(SignalingMachine::new(meeting_uuid, stream_id, timeouts, now));
        }
        if let Some(mut stale) = core.transport.take() {
            stale.close();
        }

        let Core {
            machine: Some(machine),
            transport: slot,
            media,
            ..
        } = &mut *core
        else {
            transport.close();
            return Err(RtmsError::InvalidState("no stream to join".to_string()));
        };
        if let Err(e) = machine.start_handshake(&signature, media, &mut *transport, now) {
            transport.close();
            return Err(e);
        }
        *slot = Some(transport);

        if params.manual_poll || core.driver_active {
            return Ok(());
        }
        core.driver_active = true;
        drop(core);

        let poll_interval = params.poll_interval.unwrap_or(self.config.poll_interval);
        self.spawn_driver(poll_interval);
        Ok(())
    }

    /// Positional form of [`Client::join`] with a precomputed signature.
    ///
    /// # Errors
    ///
    /// See [`Client::join`].
    pub async fn join_with_signature(
        &self,
        meeting_uuid: &str,
        rtms_stream_id: &str,
        signature: &str,
        server_urls: &str,
    ) -> Result<(), RtmsError> {
        self.join(JoinParams::new(meeting_uuid, rtms_stream_id, server_urls).with_signature(signature))
            .await
    }

    /// Run one driver tick now. For hosts that joined with
    /// [`JoinParams::with_manual_poll`].
    ///
    /// Returns whether the stream still needs polling.
    ///
    /// # Errors
    ///
    /// Returns `RtmsError::InvalidState` if the client never joined.
    pub fn poll(&self) -> Result<bool, RtmsError> {
        let mut core = self.core.lock_idle();
        if core.machine.is_none() {
            return Err(RtmsError::InvalidState("not joined".to_string()));
        }
        let running = core.tick(Instant::now());
        self.core.deliver(core);
        Ok(running)
    }

    /// Leave the stream and release the connection.
    ///
    /// Stops the poll driver first and waits for callbacks running on other
    /// threads; no callback runs after this returns except `on_leave`, which
    /// runs inside this call. Called from inside a callback, `on_leave` runs
    /// right after that callback returns. Calling it again, or before any
    /// join, is a no-op.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` mirrors the other lifecycle calls.
    pub fn leave(&self) -> Result<(), RtmsError> {
        self.stop_driver();

        let mut core = self.core.lock_idle();
        core.driver_active = false;
        if core.leave() {
            info!(target: "rtms.client", client_id = %self.id, "Left stream");
        } else {
            debug!(target: "rtms.client", client_id = %self.id, "Nothing to leave");
        }
        self.core.deliver(core);
        Ok(())
    }

    fn spawn_driver(&self, poll_interval: Duration) {
        let cancel_token = CancellationToken::new();
        let previous = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cancel_token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        tokio::spawn(run_poll_driver(
            Arc::clone(&self.core),
            poll_interval,
            cancel_token,
        ));
    }

    fn stop_driver(&self) {
        let token = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop_driver();
        if let Some(mut transport) = lock(&self.core).transport.take() {
            transport.close();
        }
    }
}

/// Whether a join for `meeting_uuid`/`stream_id` may start now.
fn check_joinable(
    core: &Core,
    meeting_uuid: &MeetingUuid,
    stream_id: &StreamId,
) -> Result<(), RtmsError> {
    let Some(machine) = core.machine.as_ref() else {
        return Ok(());
    };
    match machine.state() {
        SignalingState::Disconnected | SignalingState::Terminated => Ok(()),
        SignalingState::Interrupted
            if machine.meeting_uuid() == meeting_uuid && machine.stream_id() == stream_id =>
        {
            Ok(())
        }
        SignalingState::Interrupted => Err(RtmsError::InvalidState(format!(
            "stream {} is interrupted, rejoin it or leave first",
            machine.stream_id()
        ))),
        state => Err(RtmsError::InvalidState(format!("already {state}"))),
    }
}
