//! End-to-end tests for the RTMS client.
//!
//! Drive a real WebSocket connection against the scripted mock server:
//! handshake, media delivery, keepalive, server-side termination and
//! local leave.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::time::Duration;

use rtms_client::config::{CLIENT_VAR, SECRET_VAR};
use rtms_client::{
    status, Client, Config, JoinParams, MediaFrame, MediaKind, Participant, SessionEvent,
    SessionInfo, SignalingState, UserEvent,
};
use rtms_test_utils::fixtures::{self, TestStream};
use rtms_test_utils::MockRtmsServer;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

/// Callback outputs funneled into channels.
struct Recorded {
    joins: mpsc::UnboundedReceiver<i32>,
    leaves: mpsc::UnboundedReceiver<i32>,
    media: mpsc::UnboundedReceiver<MediaFrame>,
}

fn record(client: &Client, kinds: &[MediaKind]) -> Recorded {
    let (join_tx, joins) = mpsc::unbounded_channel();
    client.on_join_confirm(move |reason| {
        let _ = join_tx.send(reason);
    });

    let (leave_tx, leaves) = mpsc::unbounded_channel();
    client.on_leave(move |reason| {
        let _ = leave_tx.send(reason);
    });

    let (media_tx, media) = mpsc::unbounded_channel();
    for kind in kinds {
        let tx = media_tx.clone();
        let callback = move |frame: &MediaFrame| {
            let _ = tx.send(frame.clone());
        };
        match kind {
            MediaKind::Audio => client.on_audio_data(callback),
            MediaKind::Video => client.on_video_data(callback),
            MediaKind::Deskshare => client.on_deskshare_data(callback),
            MediaKind::Transcript => client.on_transcript_data(callback),
            MediaKind::Chat => client.on_chat_data(callback),
        }
    }

    Recorded {
        joins,
        leaves,
        media,
    }
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

async fn wait_for_state(client: &Client, state: SignalingState) {
    tokio::time::timeout(WAIT, async {
        while client.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {state}, still {}",
            client.state()
        )
    });
}

fn join_params(server: &MockRtmsServer, stream: &TestStream) -> JoinParams {
    JoinParams::new(&stream.meeting_uuid, &stream.stream_id, server.url())
        .with_signature(stream.signature())
}

/// Join and wait until the stream is READY.
async fn joined(server: &MockRtmsServer, kinds: &[MediaKind]) -> (Client, Recorded, TestStream) {
    let client = Client::new(Config::default());
    let mut recorded = record(&client, kinds);
    let stream = TestStream::random();

    client.join(join_params(server, &stream)).await.unwrap();
    assert_eq!(next(&mut recorded.joins).await, status::OK);
    wait_for_state(&client, SignalingState::Ready).await;

    (client, recorded, stream)
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_accepted_handshake_sends_one_ready_ack() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, _recorded, stream) = joined(&server, &[MediaKind::Audio]).await;

    let requests = server.received_of_type("SIGNALING_HAND_SHAKE_REQ");
    assert_eq!(requests.len(), 1);
    let request = requests.first().unwrap();
    assert_eq!(request["sequence"], 0);
    assert_eq!(request["meeting_uuid"], stream.meeting_uuid.as_str());
    assert_eq!(request["media_type"], 1);

    let acks = server.wait_for("CLIENT_READY_ACK", 1).await.unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks.first().unwrap()["rtms_stream_id"], stream.stream_id.as_str());

    // Nothing further arrives
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.received_of_type("CLIENT_READY_ACK").len(), 1);
    assert!(!client.session().unwrap().is_active);
}

#[tokio::test]
async fn test_rejected_handshake_reports_status() {
    let server = MockRtmsServer::builder()
        .handshake_status(status::TIMEOUT)
        .start()
        .await
        .unwrap();
    let client = Client::new(Config::default());
    let mut recorded = record(&client, &[]);
    let stream = TestStream::random();

    client.join(join_params(&server, &stream)).await.unwrap();

    assert_eq!(next(&mut recorded.joins).await, status::TIMEOUT);
    wait_for_state(&client, SignalingState::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.received_of_type("CLIENT_READY_ACK").is_empty());
    assert_eq!(server.received().len(), 1);
    assert!(recorded.leaves.try_recv().is_err());
}

#[tokio::test]
async fn test_signature_from_config_credentials() {
    let server = MockRtmsServer::builder()
        .verify_signature(fixtures::TEST_CLIENT_ID, fixtures::TEST_SECRET)
        .start()
        .await
        .unwrap();

    let vars: HashMap<String, String> = [
        (CLIENT_VAR.to_string(), fixtures::TEST_CLIENT_ID.to_string()),
        (SECRET_VAR.to_string(), fixtures::TEST_SECRET.to_string()),
    ]
    .into_iter()
    .collect();
    let client = Client::new(Config::from_vars(&vars).unwrap());
    let mut recorded = record(&client, &[]);
    let stream = TestStream::random();

    client
        .join(JoinParams::new(
            &stream.meeting_uuid,
            &stream.stream_id,
            server.url(),
        ))
        .await
        .unwrap();
    assert_eq!(next(&mut recorded.joins).await, status::OK);

    // Wrong secret is rejected by the server
    let other = Client::new(Config::default());
    let mut other_recorded = record(&other, &[]);
    other
        .join(
            JoinParams::new(&stream.meeting_uuid, &stream.stream_id, server.url())
                .with_client(fixtures::TEST_CLIENT_ID)
                .with_secret("wrong-secret"),
        )
        .await
        .unwrap();
    assert_eq!(
        next(&mut other_recorded.joins).await,
        fixtures::STATUS_INVALID_ARGS
    );
}

#[tokio::test]
async fn test_handshake_deadline() {
    let server = MockRtmsServer::builder()
        .silent_handshake()
        .start()
        .await
        .unwrap();
    let client = Client::new(Config::default());
    let mut recorded = record(&client, &[]);
    let stream = TestStream::random();

    client
        .join(join_params(&server, &stream).with_timeout(Duration::from_millis(300)))
        .await
        .unwrap();

    assert_eq!(next(&mut recorded.joins).await, status::TIMEOUT);
    wait_for_state(&client, SignalingState::Disconnected).await;
}

#[tokio::test]
async fn test_failover_to_second_candidate() {
    // A port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let server = MockRtmsServer::accepting().await.unwrap();
    let client = Client::new(Config::default());
    let mut recorded = record(&client, &[]);
    let stream = TestStream::random();

    client
        .join(
            JoinParams::new(
                &stream.meeting_uuid,
                &stream.stream_id,
                format!("{dead},{}", server.url()),
            )
            .with_signature(stream.signature()),
        )
        .await
        .unwrap();

    assert_eq!(next(&mut recorded.joins).await, status::OK);
    assert_eq!(server.connections(), 1);
}

// ============================================================================
// Media
// ============================================================================

#[tokio::test]
async fn test_audio_frame_delivered_once() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, mut recorded, _stream) = joined(&server, &[MediaKind::Audio]).await;

    server.send_media(&fixtures::bob_audio()).unwrap();

    let frame = next(&mut recorded.media).await;
    assert_eq!(frame.kind, MediaKind::Audio);
    assert_eq!(frame.payload.as_ref(), &[1u8, 2, 3]);
    assert_eq!(frame.timestamp, 1000);
    assert_eq!(frame.metadata.user_name, "Bob");
    assert_eq!(frame.metadata.user_id, 7);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorded.media.try_recv().is_err());
    assert_eq!(client.media_stats(MediaKind::Audio).frames, 1);
}

#[tokio::test]
async fn test_audio_after_stream_goes_active() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, mut recorded, _stream) = joined(&server, &[MediaKind::Audio]).await;

    server.send_json(&fixtures::stream_state("ACTIVE", None)).unwrap();
    wait_for_state(&client, SignalingState::Active).await;

    server.send_media(&fixtures::bob_audio()).unwrap();

    let frame = next(&mut recorded.media).await;
    assert_eq!(frame.kind, MediaKind::Audio);
    assert_eq!(frame.payload.as_ref(), &[1u8, 2, 3]);
    assert_eq!(frame.timestamp, 1000);
    assert_eq!(frame.metadata.user_name, "Bob");
    assert_eq!(frame.metadata.user_id, 7);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorded.media.try_recv().is_err());
    assert_eq!(client.media_stats(MediaKind::Audio).frames, 1);
    assert_eq!(client.state(), SignalingState::Active);
}

#[tokio::test]
async fn test_interleaved_media_keeps_arrival_order() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (_client, mut recorded, _stream) = joined(
        &server,
        &[MediaKind::Audio, MediaKind::Video, MediaKind::Transcript],
    )
    .await;

    let frames = [
        fixtures::media_frame(MediaKind::Video, &[10], 1, "Ann", 3),
        fixtures::media_frame(MediaKind::Audio, &[20], 2, "Bob", 7),
        fixtures::media_frame(MediaKind::Transcript, b"hello", 3, "Bob", 7),
        fixtures::media_frame(MediaKind::Audio, &[21], 4, "Bob", 7),
        fixtures::media_frame(MediaKind::Video, &[11], 5, "Ann", 3),
    ];
    for (i, frame) in frames.iter().enumerate() {
        // Mix both encodings
        if i % 2 == 0 {
            server.send_media(frame).unwrap();
        } else {
            server.send_media_json(frame).unwrap();
        }
    }

    let mut delivered = Vec::new();
    for _ in 0..frames.len() {
        delivered.push(next(&mut recorded.media).await);
    }
    assert_eq!(delivered, frames.to_vec());
}

#[tokio::test]
async fn test_unknown_and_malformed_messages_are_harmless() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, mut recorded, _stream) = joined(&server, &[MediaKind::Audio]).await;

    server
        .send_json(&serde_json::json!({"msg_type": "SOMETHING_NEW", "payload": [1, 2]}))
        .unwrap();
    server.send_text("not json at all").unwrap();
    server.send_binary(vec![0xFFu8; 4]).unwrap();
    server.send_media(&fixtures::bob_audio()).unwrap();

    assert_eq!(next(&mut recorded.media).await, fixtures::bob_audio());
    assert_eq!(client.state(), SignalingState::Ready);
}

#[tokio::test]
async fn test_panicking_callback_does_not_end_stream() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, mut recorded, _stream) =
        joined(&server, &[MediaKind::Audio, MediaKind::Transcript]).await;
    // Replaces the recording audio callback
    client.on_audio_data(|_| panic!("consumer bug"));

    server.send_media(&fixtures::bob_audio()).unwrap();
    let transcript = fixtures::media_frame(MediaKind::Transcript, b"hi", 5, "Bob", 7);
    server.send_media(&transcript).unwrap();

    assert_eq!(next(&mut recorded.media).await, transcript);
    assert_eq!(client.callback_failures(), 1);
    assert_eq!(client.state(), SignalingState::Ready);
}

// ============================================================================
// Control messages
// ============================================================================

#[tokio::test]
async fn test_keepalive_echoed() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (_client, _recorded, _stream) = joined(&server, &[]).await;

    server.send_json(&fixtures::keepalive_request(4242)).unwrap();

    let responses = server.wait_for("KEEP_ALIVE_RESP", 1).await.unwrap();
    assert_eq!(responses.first().unwrap()["timestamp"], 4242);
}

#[tokio::test]
async fn test_session_and_participant_tracking() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, _recorded, _stream) = joined(&server, &[]).await;

    let (session_tx, mut sessions) = mpsc::unbounded_channel();
    client.on_session_update(move |op: SessionEvent, session: &SessionInfo| {
        let _ = session_tx.send((op, session.clone()));
    });
    let (user_tx, mut users) = mpsc::unbounded_channel();
    client.on_user_update(move |op: UserEvent, participant: &Participant| {
        let _ = user_tx.send((op, participant.clone()));
    });

    server.send_json(&fixtures::stream_state("ACTIVE", None)).unwrap();
    server.send_json(&fixtures::session_state("ADD", "sess-1")).unwrap();
    server.send_json(&fixtures::user_joined(7, "Bob")).unwrap();
    server.send_json(&fixtures::user_joined(3, "Ann")).unwrap();
    server.send_json(&fixtures::session_state("PAUSE", "sess-1")).unwrap();

    let (op, session) = next(&mut sessions).await;
    assert_eq!(op, SessionEvent::Add);
    assert_eq!(session.session_id, "sess-1");
    assert!(session.is_active);

    let (op, bob) = next(&mut users).await;
    assert_eq!(op, UserEvent::UserJoin);
    assert_eq!(bob.name, "Bob");
    next(&mut users).await;

    let (op, session) = next(&mut sessions).await;
    assert_eq!(op, SessionEvent::Pause);
    assert!(session.is_paused);

    wait_for_state(&client, SignalingState::Paused).await;
    let ids: Vec<u32> = client.participants().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![3, 7]);
}

#[tokio::test]
async fn test_server_termination_reason_reported() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, mut recorded, _stream) = joined(&server, &[]).await;

    server
        .send_json(&fixtures::stream_state("TERMINATED", Some(status::NOT_EXIST)))
        .unwrap();

    assert_eq!(next(&mut recorded.leaves).await, status::NOT_EXIST);
    wait_for_state(&client, SignalingState::Terminated).await;

    // Leaving afterwards reports nothing new
    client.leave().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recorded.leaves.try_recv().is_err());
}

#[tokio::test]
async fn test_server_close_is_transport_failure() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, mut recorded, _stream) = joined(&server, &[]).await;

    server.close_connection().unwrap();

    assert_eq!(next(&mut recorded.leaves).await, status::FAILURE);
    wait_for_state(&client, SignalingState::Terminated).await;
}

#[tokio::test]
async fn test_reply_then_close_is_processed_in_order() {
    let server = MockRtmsServer::builder().silent_handshake().start().await.unwrap();
    let client = Client::new(Config::default());
    let mut recorded = record(&client, &[]);
    let stream = TestStream::random();

    client.join(join_params(&server, &stream)).await.unwrap();
    server.wait_for("SIGNALING_HAND_SHAKE_REQ", 1).await.unwrap();

    server.send_json(&fixtures::handshake_response(status::OK)).unwrap();
    server.close_connection().unwrap();

    // The reply is handled before the drop, so the join succeeds first
    assert_eq!(next(&mut recorded.joins).await, status::OK);
    assert_eq!(next(&mut recorded.leaves).await, status::FAILURE);
    wait_for_state(&client, SignalingState::Terminated).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recorded.joins.try_recv().is_err());
    assert!(recorded.leaves.try_recv().is_err());
}

#[tokio::test]
async fn test_garbled_handshake_reply_fails_join_immediately() {
    let server = MockRtmsServer::builder().silent_handshake().start().await.unwrap();
    let client = Client::new(Config::default());
    let mut recorded = record(&client, &[]);
    let stream = TestStream::random();

    client.join(join_params(&server, &stream)).await.unwrap();
    server.wait_for("SIGNALING_HAND_SHAKE_REQ", 1).await.unwrap();
    server
        .send_text(r#"{"msg_type":"SIGNALING_HAND_SHAKE_RESP","status_code":"zero"}"#)
        .unwrap();

    // Well ahead of the handshake deadline
    let reason = tokio::time::timeout(Duration::from_secs(1), recorded.joins.recv())
        .await
        .expect("garbled reply should fail the join at once")
        .unwrap();
    assert_eq!(reason, status::FAILURE);
    assert!(server.received_of_type("CLIENT_READY_ACK").is_empty());
}

// ============================================================================
// Leave
// ============================================================================

#[tokio::test]
async fn test_leave_is_idempotent() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (client, mut recorded, _stream) = joined(&server, &[MediaKind::Audio]).await;

    client.leave().unwrap();
    assert_eq!(client.state(), SignalingState::Terminated);
    assert_eq!(next(&mut recorded.leaves).await, status::OK);

    client.leave().unwrap();
    assert_eq!(client.state(), SignalingState::Terminated);

    // No callbacks after leave, even if the server keeps talking
    let _ = server.send_media(&fixtures::bob_audio());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorded.leaves.try_recv().is_err());
    assert!(recorded.media.try_recv().is_err());
}

#[tokio::test]
async fn test_independent_clients() {
    let server = MockRtmsServer::accepting().await.unwrap();
    let (first, mut first_recorded, _) = joined(&server, &[MediaKind::Audio]).await;
    let (second, mut second_recorded, _) = joined(&server, &[MediaKind::Audio]).await;
    assert_eq!(server.connections(), 2);

    // The newest connection receives pushed frames
    server.send_media(&fixtures::bob_audio()).unwrap();
    assert_eq!(next(&mut second_recorded.media).await, fixtures::bob_audio());

    first.leave().unwrap();
    assert_eq!(next(&mut first_recorded.leaves).await, status::OK);
    assert_eq!(second.state(), SignalingState::Ready);
    assert!(first_recorded.media.try_recv().is_err());
}
