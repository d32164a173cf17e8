//! Signaling state machine.
//!
//! Drives one stream from handshake to termination:
//!
//! ```text
//! DISCONNECTED -> HANDSHAKING -> READY -> ACTIVE <-> PAUSED
//!                                          |
//!                                     INTERRUPTED -> TERMINATING -> TERMINATED
//! ```
//!
//! The machine owns no I/O and no clock. The poll driver feeds it decoded
//! messages, transport events and the current instant; it answers through
//! the transport it is handed and appends [`Event`]s for the demultiplexer.
//! Whenever it gives up on a connection it raises a release request that
//! the driver honors by closing the transport.
//!
//! Session-wide failures are reported exactly once, through `JoinConfirm`
//! while handshaking and through `Leave` afterwards.

use crate::config::MediaConfig;
use crate::errors::{status, RtmsError};
use crate::session::{Participant, SessionInfo};
use crate::transport::Transport;
use common::types::{MeetingUuid, StreamId};
use rtms_protocol::signaling::{
    HandshakeRequest, HandshakeResponse, ParticipantEvent, SessionStateUpdate, PROTOCOL_VERSION,
};
use rtms_protocol::{
    Inbound, MediaFrame, MediaTypes, SessionEvent, SignalingMessage, StreamState, UserEvent,
};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Client-side stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Disconnected,
    Handshaking,
    Ready,
    Active,
    Paused,
    Interrupted,
    Terminating,
    Terminated,
}

impl SignalingState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SignalingState::Disconnected => "DISCONNECTED",
            SignalingState::Handshaking => "HANDSHAKING",
            SignalingState::Ready => "READY",
            SignalingState::Active => "ACTIVE",
            SignalingState::Paused => "PAUSED",
            SignalingState::Interrupted => "INTERRUPTED",
            SignalingState::Terminating => "TERMINATING",
            SignalingState::Terminated => "TERMINATED",
        }
    }

    /// No connection and nothing left to wait for.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, SignalingState::Disconnected | SignalingState::Terminated)
    }

    /// Handshake accepted and the stream not yet torn down.
    #[must_use]
    pub const fn is_joined(self) -> bool {
        matches!(
            self,
            SignalingState::Ready
                | SignalingState::Active
                | SignalingState::Paused
                | SignalingState::Interrupted
        )
    }

    /// States in which media is delivered.
    const fn accepts_media(self) -> bool {
        matches!(
            self,
            SignalingState::Ready | SignalingState::Active | SignalingState::Paused
        )
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deadlines enforced by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for the handshake response.
    pub handshake: Duration,
    /// Inbound silence tolerated once joined.
    pub keepalive: Duration,
    /// Time allowed in INTERRUPTED.
    pub interruption: Duration,
}

/// Output of the machine, consumed by the demultiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    JoinConfirm(i32),
    SessionUpdate {
        op: SessionEvent,
        session: SessionInfo,
    },
    UserUpdate {
        op: UserEvent,
        participant: Participant,
    },
    Media(MediaFrame),
    Leave(i32),
}

/// State machine for one meeting stream.
#[derive(Debug)]
pub struct SignalingMachine {
    meeting_uuid: MeetingUuid,
    stream_id: StreamId,
    timeouts: Timeouts,
    state: SignalingState,
    media: MediaTypes,
    session: Option<SessionInfo>,
    participants: BTreeMap<u32, Participant>,
    handshake_deadline: Option<Instant>,
    last_inbound: Instant,
    interrupted_since: Option<Instant>,
    /// Current handshake re-establishes an interrupted stream
    resuming: bool,
    release_requested: bool,
}

impl SignalingMachine {
    #[must_use]
    pub fn new(
        meeting_uuid: MeetingUuid,
        stream_id: StreamId,
        timeouts: Timeouts,
        now: Instant,
    ) -> Self {
        Self {
            meeting_uuid,
            stream_id,
            timeouts,
            state: SignalingState::Disconnected,
            media: MediaTypes::NONE,
            session: None,
            participants: BTreeMap::new(),
            handshake_deadline: None,
            last_inbound: now,
            interrupted_since: None,
            resuming: false,
            release_requested: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SignalingState {
        self.state
    }

    #[must_use]
    pub fn meeting_uuid(&self) -> &MeetingUuid {
        &self.meeting_uuid
    }

    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    #[must_use]
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Participants currently in the meeting, ordered by ID.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Media kinds negotiated by the last handshake.
    #[must_use]
    pub fn media_types(&self) -> MediaTypes {
        self.media
    }

    /// Send the handshake request.
    ///
    /// Allowed from DISCONNECTED, or from INTERRUPTED to re-establish the
    /// stream on a fresh connection.
    ///
    /// # Errors
    ///
    /// - `RtmsError::InvalidState` from any other state
    /// - `RtmsError::NotConnected` if the request could not be sent; the
    ///   state is left unchanged
    pub fn start_handshake(
        &mut self,
        signature: &str,
        media: &MediaConfig,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> Result<(), RtmsError> {
        let resuming = match self.state {
            SignalingState::Disconnected => false,
            SignalingState::Interrupted => true,
            other => {
                return Err(RtmsError::InvalidState(format!(
                    "cannot join while {other}"
                )))
            }
        };

        let request = SignalingMessage::HandshakeRequest(HandshakeRequest {
            protocol_version: PROTOCOL_VERSION,
            sequence: 0,
            meeting_uuid: self.meeting_uuid.to_string(),
            rtms_stream_id: self.stream_id.to_string(),
            signature: signature.to_string(),
            media_type: (!media.types.is_empty()).then_some(media.types.bits()),
            media_params: media.params.clone(),
        });
        send(transport, &request)?;

        self.media = media.types;
        self.state = SignalingState::Handshaking;
        self.handshake_deadline = Some(now + self.timeouts.handshake);
        self.last_inbound = now;
        self.resuming = resuming;
        self.release_requested = false;

        info!(
            target: "rtms.signaling",
            meeting_uuid = %self.meeting_uuid,
            stream_id = %self.stream_id,
            media_types = media.types.bits(),
            resuming,
            "Handshake request sent"
        );
        Ok(())
    }

    /// Process one decoded inbound message.
    pub fn handle(
        &mut self,
        inbound: Inbound,
        transport: &mut dyn Transport,
        now: Instant,
        events: &mut Vec<Event>,
    ) {
        if self.state.is_finished() || self.state == SignalingState::Terminating {
            trace!(
                target: "rtms.signaling",
                msg_type = inbound.label(),
                state = %self.state,
                "Ignoring message, stream is closed"
            );
            return;
        }
        self.last_inbound = now;

        match inbound {
            Inbound::Media(frame) => self.on_media(frame, events),
            Inbound::Signaling(message) => match message {
                SignalingMessage::HandshakeResponse(response) => {
                    self.on_handshake_response(&response, transport, events);
                }
                SignalingMessage::KeepAliveRequest { timestamp } => {
                    self.on_keepalive(timestamp, transport, events);
                }
                SignalingMessage::KeepAliveResponse { .. } => {
                    trace!(target: "rtms.signaling", "Keepalive response received");
                }
                SignalingMessage::StreamStateUpdate { state, reason } => {
                    self.on_stream_state(state, reason, now, events);
                }
                SignalingMessage::SessionStateUpdate(update) => {
                    self.on_session_update(&update, events);
                }
                SignalingMessage::EventUpdate(event) => self.on_user_event(&event, events),
                other @ (SignalingMessage::HandshakeRequest(_)
                | SignalingMessage::ClientReadyAck { .. }) => {
                    debug!(
                        target: "rtms.signaling",
                        msg_type = other.msg_type(),
                        "Ignoring client-bound message from server"
                    );
                }
            },
        }
    }

    /// The transport reported that the connection ended.
    pub fn handle_disconnect(&mut self, reason: &str, events: &mut Vec<Event>) {
        match self.state {
            SignalingState::Handshaking => {
                warn!(
                    target: "rtms.signaling",
                    stream_id = %self.stream_id,
                    reason = %reason,
                    "Connection lost during handshake"
                );
                self.fail_handshake(status::FAILURE, events);
            }
            SignalingState::Ready | SignalingState::Active | SignalingState::Paused => {
                warn!(
                    target: "rtms.signaling",
                    stream_id = %self.stream_id,
                    reason = %reason,
                    "Connection lost"
                );
                self.terminate(status::FAILURE, events);
            }
            SignalingState::Interrupted => {
                // Stream can still be re-established until the interruption deadline
                info!(
                    target: "rtms.signaling",
                    stream_id = %self.stream_id,
                    reason = %reason,
                    "Connection lost while interrupted, waiting for rejoin"
                );
                self.release_requested = true;
            }
            SignalingState::Disconnected
            | SignalingState::Terminating
            | SignalingState::Terminated => {
                trace!(target: "rtms.signaling", reason = %reason, "Late disconnect ignored");
            }
        }
    }

    /// Enforce handshake, liveness and interruption deadlines.
    pub fn check_timers(&mut self, now: Instant, events: &mut Vec<Event>) {
        match self.state {
            SignalingState::Handshaking => {
                if self.handshake_deadline.is_some_and(|deadline| now >= deadline) {
                    let error = RtmsError::TimedOut("handshake response".to_string());
                    warn!(
                        target: "rtms.signaling",
                        stream_id = %self.stream_id,
                        error = %error,
                        timeout = ?self.timeouts.handshake,
                        "Handshake deadline expired"
                    );
                    self.fail_handshake(status::TIMEOUT, events);
                }
            }
            SignalingState::Ready | SignalingState::Active | SignalingState::Paused => {
                let silent_for = now.saturating_duration_since(self.last_inbound);
                if silent_for >= self.timeouts.keepalive {
                    let error = RtmsError::LivenessFault(format!("no traffic for {silent_for:?}"));
                    warn!(
                        target: "rtms.signaling",
                        stream_id = %self.stream_id,
                        error = %error,
                        "Server went silent"
                    );
                    self.terminate(status::TIMEOUT, events);
                }
            }
            SignalingState::Interrupted => {
                if self.interrupted_since.is_some_and(|since| {
                    now.saturating_duration_since(since) >= self.timeouts.interruption
                }) {
                    warn!(
                        target: "rtms.signaling",
                        stream_id = %self.stream_id,
                        timeout = ?self.timeouts.interruption,
                        "Stream stayed interrupted too long"
                    );
                    self.terminate(status::TIMEOUT, events);
                }
            }
            SignalingState::Disconnected
            | SignalingState::Terminating
            | SignalingState::Terminated => {}
        }
    }

    /// Local leave. Returns `false` if the stream was already terminated.
    pub fn leave(&mut self, events: &mut Vec<Event>) -> bool {
        match self.state {
            SignalingState::Terminated => false,
            SignalingState::Terminating => {
                self.release_requested = true;
                true
            }
            SignalingState::Disconnected => {
                // Never joined; nothing to report
                self.state = SignalingState::Terminated;
                self.release_requested = true;
                true
            }
            _ => {
                info!(
                    target: "rtms.signaling",
                    stream_id = %self.stream_id,
                    state = %self.state,
                    "Leaving stream"
                );
                self.terminate(status::OK, events);
                true
            }
        }
    }

    /// Whether the machine wants its transport closed.
    #[must_use]
    pub fn release_requested(&self) -> bool {
        self.release_requested
    }

    /// The transport has been closed. Completes TERMINATING.
    pub fn transport_released(&mut self) {
        self.release_requested = false;
        if self.state == SignalingState::Terminating {
            self.state = SignalingState::Terminated;
            debug!(
                target: "rtms.signaling",
                stream_id = %self.stream_id,
                "Stream terminated"
            );
        }
    }

    fn on_handshake_response(
        &mut self,
        response: &HandshakeResponse,
        transport: &mut dyn Transport,
        events: &mut Vec<Event>,
    ) {
        if self.state != SignalingState::Handshaking {
            debug!(
                target: "rtms.signaling",
                state = %self.state,
                "Ignoring unexpected handshake response"
            );
            return;
        }
        self.handshake_deadline = None;

        if !response.is_accepted() {
            // Absent status_code fails closed
            let status_code = response.status_code.unwrap_or(status::FAILURE);
            let error = RtmsError::HandshakeRejected {
                status_code,
                reason: response.reason.clone(),
            };
            warn!(
                target: "rtms.signaling",
                stream_id = %self.stream_id,
                error = %error,
                reason = ?response.reason,
                "Handshake rejected"
            );
            self.fail_handshake(status_code, events);
            return;
        }

        let ack = SignalingMessage::ClientReadyAck {
            rtms_stream_id: self.stream_id.to_string(),
        };
        if let Err(e) = send(transport, &ack) {
            warn!(
                target: "rtms.signaling",
                stream_id = %self.stream_id,
                error = %e,
                "Could not send ready acknowledgment"
            );
            self.fail_handshake(status::FAILURE, events);
            return;
        }

        if self.resuming {
            self.resuming = false;
            self.interrupted_since = None;
            self.state = SignalingState::Active;
            info!(
                target: "rtms.signaling",
                stream_id = %self.stream_id,
                media_server = ?response.media_server,
                "Stream re-established"
            );
        } else {
            self.state = SignalingState::Ready;
            self.session = Some(SessionInfo::initialized());
            info!(
                target: "rtms.signaling",
                stream_id = %self.stream_id,
                media_server = ?response.media_server,
                "Handshake accepted"
            );
        }
        events.push(Event::JoinConfirm(status::OK));
    }

    fn on_keepalive(
        &mut self,
        timestamp: Option<u64>,
        transport: &mut dyn Transport,
        events: &mut Vec<Event>,
    ) {
        match send(transport, &SignalingMessage::KeepAliveResponse { timestamp }) {
            Ok(()) => trace!(target: "rtms.signaling", ?timestamp, "Keepalive answered"),
            Err(e) => {
                let error = RtmsError::LivenessFault(format!("keepalive answer failed: {e}"));
                warn!(
                    target: "rtms.signaling",
                    stream_id = %self.stream_id,
                    error = %error,
                    "Treating unanswered keepalive as disconnect"
                );
                match self.state {
                    SignalingState::Handshaking => self.fail_handshake(status::FAILURE, events),
                    _ => self.terminate(status::TIMEOUT, events),
                }
            }
        }
    }

    fn on_stream_state(
        &mut self,
        state: StreamState,
        reason: Option<i32>,
        now: Instant,
        events: &mut Vec<Event>,
    ) {
        match (state, self.state) {
            (StreamState::Active, SignalingState::Ready | SignalingState::Interrupted) => {
                self.interrupted_since = None;
                self.state = SignalingState::Active;
                info!(target: "rtms.signaling", stream_id = %self.stream_id, "Stream active");
            }
            (
                StreamState::Interrupted,
                SignalingState::Ready | SignalingState::Active | SignalingState::Paused,
            ) => {
                self.interrupted_since = Some(now);
                self.state = SignalingState::Interrupted;
                warn!(target: "rtms.signaling", stream_id = %self.stream_id, "Stream interrupted");
            }
            (StreamState::Terminating | StreamState::Terminated, SignalingState::Handshaking) => {
                self.fail_handshake(reason.unwrap_or(status::FAILURE), events);
            }
            (StreamState::Terminating | StreamState::Terminated, _) => {
                info!(
                    target: "rtms.signaling",
                    stream_id = %self.stream_id,
                    reason = ?reason,
                    "Server ended the stream"
                );
                self.terminate(reason.unwrap_or(status::OK), events);
            }
            (state, current) => {
                debug!(
                    target: "rtms.signaling",
                    update = ?state,
                    state = %current,
                    "Stream state update has no effect"
                );
            }
        }
    }

    fn on_session_update(&mut self, update: &SessionStateUpdate, events: &mut Vec<Event>) {
        if !self.state.is_joined() {
            debug!(
                target: "rtms.signaling",
                state = %self.state,
                "Ignoring session update before join"
            );
            return;
        }

        let session = self.session.get_or_insert_with(SessionInfo::initialized);
        session.apply(update);
        let snapshot = session.clone();

        match (update.state, self.state) {
            (SessionEvent::Pause, SignalingState::Active) => self.state = SignalingState::Paused,
            (SessionEvent::Resume, SignalingState::Paused) => self.state = SignalingState::Active,
            (SessionEvent::Stop, _) => self.session = None,
            _ => {}
        }

        debug!(
            target: "rtms.signaling",
            stream_id = %self.stream_id,
            session_id = %snapshot.session_id,
            status = %snapshot.status,
            state = %self.state,
            "Session updated"
        );
        events.push(Event::SessionUpdate {
            op: update.state,
            session: snapshot,
        });
    }

    fn on_user_event(&mut self, event: &ParticipantEvent, events: &mut Vec<Event>) {
        if !self.state.is_joined() {
            debug!(
                target: "rtms.signaling",
                state = %self.state,
                "Ignoring participant event before join"
            );
            return;
        }

        let participant = match event.event {
            UserEvent::UserJoin => {
                let participant = Participant::from(event);
                self.participants
                    .insert(participant.id, participant.clone());
                participant
            }
            UserEvent::UserLeave => self
                .participants
                .remove(&event.user_id)
                .unwrap_or_else(|| Participant::from(event)),
        };

        events.push(Event::UserUpdate {
            op: event.event,
            participant,
        });
    }

    fn on_media(&mut self, frame: MediaFrame, events: &mut Vec<Event>) {
        if !self.state.accepts_media() {
            debug!(
                target: "rtms.signaling",
                kind = %frame.kind,
                state = %self.state,
                "Dropping media outside an open stream"
            );
            return;
        }
        if !self.media.contains(frame.kind) {
            debug!(
                target: "rtms.signaling",
                kind = %frame.kind,
                negotiated = self.media.bits(),
                "Dropping media of a kind not negotiated"
            );
            return;
        }
        events.push(Event::Media(frame));
    }

    fn fail_handshake(&mut self, status_code: i32, events: &mut Vec<Event>) {
        self.handshake_deadline = None;
        self.release_requested = true;
        if self.resuming {
            // Back to waiting; the interruption deadline still applies
            self.resuming = false;
            self.state = SignalingState::Interrupted;
        } else {
            self.state = SignalingState::Disconnected;
            self.session = None;
        }
        events.push(Event::JoinConfirm(status_code));
    }

    fn terminate(&mut self, reason: i32, events: &mut Vec<Event>) {
        self.state = SignalingState::Terminating;
        self.session = None;
        self.participants.clear();
        self.handshake_deadline = None;
        self.interrupted_since = None;
        self.resuming = false;
        self.release_requested = true;
        events.push(Event::Leave(reason));
    }
}

fn send(transport: &mut dyn Transport, message: &SignalingMessage) -> Result<(), RtmsError> {
    let text = message.to_json()?;
    transport.send_text(text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockPeer, MockTransport};
    use rtms_protocol::signaling::{AudioParams, ParticipantEvent};
    use rtms_protocol::{decode_text, MediaKind, SenderMetadata};
    use serde_json::{json, Value};

    const TIMEOUTS: Timeouts = Timeouts {
        handshake: Duration::from_secs(10),
        keepalive: Duration::from_secs(60),
        interruption: Duration::from_secs(30),
    };

    struct Harness {
        machine: SignalingMachine,
        peer: MockPeer,
        transport: MockTransport,
        t0: Instant,
        events: Vec<Event>,
    }

    impl Harness {
        fn new() -> Self {
            let t0 = Instant::now();
            let peer = MockPeer::new();
            let transport = peer.transport();
            Self {
                machine: SignalingMachine::new("m1".into(), "s1".into(), TIMEOUTS, t0),
                peer,
                transport,
                t0,
                events: Vec::new(),
            }
        }

        fn media() -> MediaConfig {
            MediaConfig {
                types: MediaTypes::AUDIO | MediaTypes::TRANSCRIPT,
                ..MediaConfig::default()
            }
        }

        fn join(&mut self) {
            self.machine
                .start_handshake("sig", &Self::media(), &mut self.transport, self.t0)
                .unwrap();
        }

        fn recv_at(&mut self, value: &Value, at: Duration) {
            let inbound = decode_text(&value.to_string()).unwrap();
            self.machine
                .handle(inbound, &mut self.transport, self.t0 + at, &mut self.events);
        }

        fn recv(&mut self, value: &Value) {
            self.recv_at(value, Duration::ZERO);
        }

        fn accept(&mut self) {
            self.join();
            self.recv(&json!({"msg_type": "SIGNALING_HAND_SHAKE_RESP", "status_code": 0}));
        }

        fn activate(&mut self) {
            self.accept();
            self.recv(&json!({"msg_type": "STREAM_STATE_UPDATE", "state": "ACTIVE"}));
        }

        fn tick(&mut self, at: Duration) {
            self.machine.check_timers(self.t0 + at, &mut self.events);
        }

        fn release(&mut self) {
            if self.machine.release_requested() {
                self.transport.close();
                self.machine.transport_released();
            }
        }

        fn take_events(&mut self) -> Vec<Event> {
            std::mem::take(&mut self.events)
        }
    }

    fn audio_frame() -> MediaFrame {
        MediaFrame::new(
            MediaKind::Audio,
            vec![1u8, 2, 3],
            1000,
            SenderMetadata::new("Bob", 7),
        )
    }

    #[test]
    fn test_handshake_request_contents() {
        let mut h = Harness::new();
        let mut media = Harness::media();
        media.set_audio(AudioParams {
            channel: Some(1),
            ..AudioParams::default()
        });
        h.machine
            .start_handshake("sig", &media, &mut h.transport, h.t0)
            .unwrap();

        let sent = h.peer.sent_json();
        assert_eq!(sent.len(), 1);
        let request = sent.first().unwrap();
        assert_eq!(request["msg_type"], "SIGNALING_HAND_SHAKE_REQ");
        assert_eq!(request["sequence"], 0);
        assert_eq!(request["protocol_version"], PROTOCOL_VERSION);
        assert_eq!(request["meeting_uuid"], "m1");
        assert_eq!(request["rtms_stream_id"], "s1");
        assert_eq!(request["signature"], "sig");
        assert_eq!(request["media_type"], 9);
        assert_eq!(request["media_params"]["audio"]["channel"], 1);
        assert_eq!(h.machine.state(), SignalingState::Handshaking);
    }

    #[test]
    fn test_handshake_accept_sends_single_ack() {
        let mut h = Harness::new();
        h.accept();

        assert_eq!(h.machine.state(), SignalingState::Ready);
        let acks = h.peer.sent_of_type("CLIENT_READY_ACK");
        assert_eq!(acks.len(), 1);
        assert_eq!(acks.first().unwrap()["rtms_stream_id"], "s1");
        assert_eq!(h.take_events(), vec![Event::JoinConfirm(status::OK)]);
        assert_eq!(
            h.machine.session().map(|s| s.status),
            Some(crate::session::SessionStatus::Initialize)
        );

        // A duplicate response changes nothing
        h.recv(&json!({"msg_type": "SIGNALING_HAND_SHAKE_RESP", "status_code": 0}));
        assert_eq!(h.peer.sent_of_type("CLIENT_READY_ACK").len(), 1);
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn test_handshake_rejected() {
        let mut h = Harness::new();
        h.join();
        h.recv(&json!({"msg_type": "SIGNALING_HAND_SHAKE_RESP", "status_code": 1, "reason": "nope"}));

        assert_eq!(h.machine.state(), SignalingState::Disconnected);
        assert_eq!(h.take_events(), vec![Event::JoinConfirm(1)]);
        assert!(h.peer.sent_of_type("CLIENT_READY_ACK").is_empty());
        assert!(h.machine.release_requested());
        assert_eq!(h.peer.sent().len(), 1);
    }

    #[test]
    fn test_handshake_without_status_fails_closed() {
        let mut h = Harness::new();
        h.join();
        h.recv(&json!({"msg_type": "SIGNALING_HAND_SHAKE_RESP"}));

        assert_eq!(h.machine.state(), SignalingState::Disconnected);
        assert_eq!(h.take_events(), vec![Event::JoinConfirm(status::FAILURE)]);
    }

    #[test]
    fn test_handshake_deadline() {
        let mut h = Harness::new();
        h.join();

        h.tick(Duration::from_secs(9));
        assert_eq!(h.machine.state(), SignalingState::Handshaking);

        h.tick(Duration::from_secs(10));
        assert_eq!(h.machine.state(), SignalingState::Disconnected);
        assert_eq!(h.take_events(), vec![Event::JoinConfirm(status::TIMEOUT)]);

        // Reported once
        h.tick(Duration::from_secs(20));
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn test_join_not_allowed_while_joined() {
        let mut h = Harness::new();
        h.accept();
        let result = h
            .machine
            .start_handshake("sig", &Harness::media(), &mut h.transport, h.t0);
        assert!(matches!(result, Err(RtmsError::InvalidState(_))));
    }

    #[test]
    fn test_pause_and_resume() {
        let mut h = Harness::new();
        h.activate();
        assert_eq!(h.machine.state(), SignalingState::Active);
        h.take_events();

        h.recv(&json!({"msg_type": "SESSION_STATE_UPDATE", "state": "PAUSE"}));
        assert_eq!(h.machine.state(), SignalingState::Paused);
        h.recv(&json!({"msg_type": "SESSION_STATE_UPDATE", "state": "RESUME"}));
        assert_eq!(h.machine.state(), SignalingState::Active);

        let ops: Vec<_> = h
            .take_events()
            .into_iter()
            .map(|event| match event {
                Event::SessionUpdate { op, session } => (op, session.is_paused),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(
            ops,
            vec![(SessionEvent::Pause, true), (SessionEvent::Resume, false)]
        );
    }

    #[test]
    fn test_session_stop_destroys_session() {
        let mut h = Harness::new();
        h.activate();
        h.recv(&json!({"msg_type": "SESSION_STATE_UPDATE", "state": "ADD", "session_id": "x"}));
        assert_eq!(h.machine.session().unwrap().session_id, "x");

        h.recv(&json!({"msg_type": "SESSION_STATE_UPDATE", "state": "STOP"}));
        assert!(h.machine.session().is_none());
        assert_eq!(h.machine.state(), SignalingState::Active);
    }

    #[test]
    fn test_participants_tracked() {
        let mut h = Harness::new();
        h.activate();
        h.take_events();

        h.recv(&json!({"msg_type": "EVENT_UPDATE", "event": "USER_JOIN", "user_id": 7, "user_name": "Bob"}));
        h.recv(&json!({"msg_type": "EVENT_UPDATE", "event": "USER_JOIN", "user_id": 3, "user_name": "Ann"}));
        let ids: Vec<u32> = h.machine.participants().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 7]);

        h.recv(&json!({"msg_type": "EVENT_UPDATE", "event": "USER_LEAVE", "user_id": 7}));
        let ids: Vec<u32> = h.machine.participants().map(|p| p.id).collect();
        assert_eq!(ids, vec![3]);

        let last = h.take_events().pop().unwrap();
        assert_eq!(
            last,
            Event::UserUpdate {
                op: UserEvent::UserLeave,
                participant: Participant {
                    id: 7,
                    name: "Bob".to_string()
                }
            }
        );
    }

    #[test]
    fn test_keepalive_answered_with_echo() {
        let mut h = Harness::new();
        h.activate();
        h.recv(&json!({"msg_type": "KEEP_ALIVE_REQ", "timestamp": 1234}));

        let responses = h.peer.sent_of_type("KEEP_ALIVE_RESP");
        assert_eq!(responses, vec![json!({"msg_type": "KEEP_ALIVE_RESP", "timestamp": 1234})]);
        assert_eq!(h.machine.state(), SignalingState::Active);
    }

    #[test]
    fn test_unanswerable_keepalive_is_liveness_fault() {
        let mut h = Harness::new();
        h.activate();
        h.take_events();
        h.peer.fail_sends(true);

        h.recv(&json!({"msg_type": "KEEP_ALIVE_REQ"}));
        assert_eq!(h.machine.state(), SignalingState::Terminating);
        assert_eq!(h.take_events(), vec![Event::Leave(status::TIMEOUT)]);

        h.release();
        assert_eq!(h.machine.state(), SignalingState::Terminated);
    }

    #[test]
    fn test_silence_is_liveness_fault() {
        let mut h = Harness::new();
        h.activate();
        h.take_events();

        h.recv_at(&json!({"msg_type": "KEEP_ALIVE_REQ"}), Duration::from_secs(50));
        h.tick(Duration::from_secs(100));
        assert_eq!(h.machine.state(), SignalingState::Active);

        h.tick(Duration::from_secs(110));
        assert_eq!(h.take_events(), vec![Event::Leave(status::TIMEOUT)]);
    }

    #[test]
    fn test_interruption_timeout() {
        let mut h = Harness::new();
        h.activate();
        h.take_events();

        h.recv_at(
            &json!({"msg_type": "STREAM_STATE_UPDATE", "state": "INTERRUPTED"}),
            Duration::from_secs(5),
        );
        assert_eq!(h.machine.state(), SignalingState::Interrupted);

        h.tick(Duration::from_secs(34));
        assert!(h.take_events().is_empty());

        h.tick(Duration::from_secs(35));
        assert_eq!(h.take_events(), vec![Event::Leave(status::TIMEOUT)]);
        h.release();
        assert_eq!(h.machine.state(), SignalingState::Terminated);
    }

    #[test]
    fn test_interrupted_stream_recovers_in_place() {
        let mut h = Harness::new();
        h.activate();
        h.recv(&json!({"msg_type": "STREAM_STATE_UPDATE", "state": "INTERRUPTED"}));
        h.recv(&json!({"msg_type": "STREAM_STATE_UPDATE", "state": "ACTIVE"}));
        assert_eq!(h.machine.state(), SignalingState::Active);

        // Interruption deadline no longer applies
        h.tick(Duration::from_secs(40));
        assert_eq!(h.machine.state(), SignalingState::Active);
    }

    #[test]
    fn test_rejoin_after_interruption_keeps_session() {
        let mut h = Harness::new();
        h.activate();
        h.recv(&json!({"msg_type": "SESSION_STATE_UPDATE", "state": "ADD", "session_id": "sess"}));
        h.recv(&json!({"msg_type": "STREAM_STATE_UPDATE", "state": "INTERRUPTED"}));
        h.machine.handle_disconnect("reset", &mut h.events);
        assert_eq!(h.machine.state(), SignalingState::Interrupted);
        h.release();
        h.take_events();

        // Fresh connection
        h.transport = h.peer.transport();
        h.peer.clear_sent();
        h.join();
        h.recv(&json!({"msg_type": "SIGNALING_HAND_SHAKE_RESP", "status_code": 0}));

        assert_eq!(h.machine.state(), SignalingState::Active);
        assert_eq!(h.machine.session().unwrap().session_id, "sess");
        assert_eq!(h.peer.sent_of_type("CLIENT_READY_ACK").len(), 1);
        assert_eq!(h.take_events(), vec![Event::JoinConfirm(status::OK)]);
    }

    #[test]
    fn test_failed_rejoin_returns_to_interrupted() {
        let mut h = Harness::new();
        h.activate();
        h.recv(&json!({"msg_type": "STREAM_STATE_UPDATE", "state": "INTERRUPTED"}));
        h.take_events();

        h.join();
        h.recv(&json!({"msg_type": "SIGNALING_HAND_SHAKE_RESP", "status_code": 4}));
        assert_eq!(h.machine.state(), SignalingState::Interrupted);
        assert_eq!(h.take_events(), vec![Event::JoinConfirm(4)]);
    }

    #[test]
    fn test_server_termination_reason() {
        let mut h = Harness::new();
        h.activate();
        h.take_events();
        h.recv(&json!({"msg_type": "STREAM_STATE_UPDATE", "state": "TERMINATED", "reason": 6}));

        assert_eq!(h.take_events(), vec![Event::Leave(6)]);
        h.release();

        // Ignored once terminated
        h.recv(&json!({"msg_type": "EVENT_UPDATE", "event": "USER_JOIN", "user_id": 1, "user_name": "x"}));
        h.recv(&json!({"msg_type": "STREAM_STATE_UPDATE", "state": "TERMINATED"}));
        assert!(h.take_events().is_empty());
        assert_eq!(h.machine.participants().count(), 0);
    }

    #[test]
    fn test_transport_loss_while_active() {
        let mut h = Harness::new();
        h.activate();
        h.take_events();
        h.machine.handle_disconnect("reset by peer", &mut h.events);
        assert_eq!(h.take_events(), vec![Event::Leave(status::FAILURE)]);
    }

    #[test]
    fn test_media_filtering() {
        let mut h = Harness::new();
        h.join();

        // Not yet accepted
        h.machine.handle(
            Inbound::Media(audio_frame()),
            &mut h.transport,
            h.t0,
            &mut h.events,
        );
        assert!(h.take_events().is_empty());

        h.recv(&json!({"msg_type": "SIGNALING_HAND_SHAKE_RESP", "status_code": 0}));
        h.take_events();

        let video = MediaFrame::new(MediaKind::Video, vec![0u8], 1, SenderMetadata::default());
        for frame in [audio_frame(), video] {
            h.machine
                .handle(Inbound::Media(frame), &mut h.transport, h.t0, &mut h.events);
        }
        assert_eq!(h.take_events(), vec![Event::Media(audio_frame())]);
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut h = Harness::new();
        h.activate();
        h.take_events();

        assert!(h.machine.leave(&mut h.events));
        h.release();
        assert_eq!(h.machine.state(), SignalingState::Terminated);
        assert_eq!(h.take_events(), vec![Event::Leave(status::OK)]);

        assert!(!h.machine.leave(&mut h.events));
        assert!(h.take_events().is_empty());
        assert_eq!(h.machine.state(), SignalingState::Terminated);
    }

    #[test]
    fn test_leave_before_join_is_silent() {
        let mut h = Harness::new();
        assert!(h.machine.leave(&mut h.events));
        h.release();
        assert_eq!(h.machine.state(), SignalingState::Terminated);
        assert!(h.take_events().is_empty());
    }

    #[test]
    fn test_client_bound_messages_ignored() {
        let mut h = Harness::new();
        h.activate();
        h.take_events();
        let state = h.machine.state();

        h.machine.handle(
            Inbound::Signaling(SignalingMessage::ClientReadyAck {
                rtms_stream_id: "s1".to_string(),
            }),
            &mut h.transport,
            h.t0,
            &mut h.events,
        );
        h.machine.handle(
            Inbound::Signaling(SignalingMessage::EventUpdate(ParticipantEvent {
                event: UserEvent::UserJoin,
                user_id: 1,
                user_name: "a".to_string(),
            })),
            &mut h.transport,
            h.t0,
            &mut h.events,
        );
        assert_eq!(h.machine.state(), state);
        assert_eq!(h.take_events().len(), 1);
    }
}
