//! Handshake Tests
//!
//! Connect, Hello, Identify or Resume, READY, and the traffic of a healthy
//! session. All tests run on the paused tokio clock.
//!
//! Run with: cargo test -p integration-tests --test handshake

use fluxer_core::{OnlineStatus, Snowflake};
use fluxer_gateway::protocol::{PresenceUpdatePayload, RequestGuildMembersPayload};
use fluxer_gateway::{
    ConnectionState, GatewayEventType, IdentifyGate, NoopIdentifyGate, OpCode, SessionState,
    ShardDescriptor, ShardEvent,
};
use integration_tests::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn single() -> ShardDescriptor {
    ShardDescriptor::new(0, 1).unwrap()
}

// ============================================================================
// Identify
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_identify_after_hello() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, mut events) = Recorder::new();
    let shard = connect_shard(
        test_config(),
        single(),
        &gateway,
        Arc::new(IdentifyGate::new(1)),
        recorder,
    );
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    assert_eq!(socket.url(), connect_url(GATEWAY_URL));

    socket.hello(HEARTBEAT_INTERVAL_MS);
    let hello_at = Instant::now();

    let (_, identify) = socket.expect(OpCode::Identify).await;
    let payload = identify.as_identify().expect("Identify payload");
    assert_eq!(payload.token, TOKEN);
    assert_eq!(payload.shard, Some([0, 1]));
    assert_eq!(payload.large_threshold, Some(50));
    assert!(!payload.compress);

    socket.ready("abc", Some(RESUME_URL), [0, 1], 1);
    opener.await.unwrap().unwrap();
    assert_eq!(shard.state(), ConnectionState::Connected);

    let session = shard.session();
    assert_eq!(session.session_id.as_deref(), Some("abc"));
    assert_eq!(session.resume_url.as_deref(), Some(RESUME_URL));
    assert_eq!(session.last_sequence, Some(1));

    let first_beat = socket.first_heartbeat().await;
    assert!(first_beat.duration_since(hello_at) < Duration::from_millis(HEARTBEAT_INTERVAL_MS));

    let ready = events
        .shard_event(|e| matches!(e, ShardEvent::Ready { .. }))
        .await;
    assert!(matches!(ready, ShardEvent::Ready { shard_id: 0, ref session_id } if session_id == "abc"));

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_minimal_ready_connects_and_resumes() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, mut events) = Recorder::new();
    let shard = connect_shard(test_config(), single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    socket.expect(OpCode::Identify).await;
    socket.dispatch(
        "READY",
        1,
        serde_json::json!({"session_id": "abc", "resume_gateway_url": RESUME_URL}),
    );

    tokio::time::timeout(Duration::from_secs(5), opener)
        .await
        .expect("open returns after READY")
        .unwrap()
        .unwrap();
    assert_eq!(shard.state(), ConnectionState::Connected);
    assert_eq!(shard.session().session_id.as_deref(), Some("abc"));
    events
        .shard_event(|e| matches!(e, ShardEvent::Ready { session_id, .. } if session_id == "abc"))
        .await;

    socket.close(4000, "Unknown error occurred");
    let mut socket = connections.next().await;
    assert_eq!(socket.url(), connect_url(RESUME_URL));
    socket.hello(HEARTBEAT_INTERVAL_MS);
    let (_, resume) = socket.expect(OpCode::Resume).await;
    assert_eq!(resume.as_resume().map(|r| r.session_id), Some("abc".to_string()));

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_ready_with_unexpected_user_shape_still_connects() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, _events) = Recorder::new();
    let shard = connect_shard(test_config(), single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    socket.expect(OpCode::Identify).await;
    socket.dispatch(
        "READY",
        1,
        serde_json::json!({"v": "1", "user": 5, "session_id": "abc", "resume_gateway_url": RESUME_URL}),
    );

    tokio::time::timeout(Duration::from_secs(5), opener)
        .await
        .expect("open returns after READY")
        .unwrap()
        .unwrap();
    let session = shard.session();
    assert_eq!(session.session_id.as_deref(), Some("abc"));
    assert_eq!(session.resume_url.as_deref(), Some(RESUME_URL));

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_carries_last_sequence() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, _events) = Recorder::new();
    let shard = connect_shard(test_config(), single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    socket.expect(OpCode::Identify).await;
    socket.ready("abc", None, [0, 1], 1);
    opener.await.unwrap().unwrap();

    socket.dispatch("MESSAGE_CREATE", 5, message_payload(7, "hi"));
    let sent_at = Instant::now();

    loop {
        let (at, beat) = socket.expect(OpCode::Heartbeat).await;
        if at > sent_at {
            assert_eq!(beat.as_heartbeat_seq(), Some(Some(5)));
            break;
        }
        socket.ack();
    }

    // ACK round trip is measured on the paused clock
    socket.ack();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(shard.latency(), Some(Duration::ZERO));

    shard.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_heartbeat_request_is_answered_immediately() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, _events) = Recorder::new();
    let shard = connect_shard(test_config(), single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    socket.expect(OpCode::Identify).await;
    socket.ready("abc", None, [0, 1], 3);
    opener.await.unwrap().unwrap();

    socket.request_heartbeat();
    let requested_at = Instant::now();

    loop {
        let (at, beat) = socket.expect(OpCode::Heartbeat).await;
        socket.ack();
        if at >= requested_at {
            assert_eq!(at, requested_at);
            assert_eq!(beat.as_heartbeat_seq(), Some(Some(3)));
            break;
        }
    }

    shard.close().await;
}

// ============================================================================
// Resume from a persisted session
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_resume_from_persisted_session() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, mut events) = Recorder::new();
    let config = test_config().with_session(SessionState::new("abc", 42).with_resume_url(RESUME_URL));
    let shard = connect_shard(config, single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    assert_eq!(socket.url(), connect_url(RESUME_URL));

    socket.hello(HEARTBEAT_INTERVAL_MS);
    let (_, resume) = socket.expect(OpCode::Resume).await;
    let payload = resume.as_resume().expect("Resume payload");
    assert_eq!(payload.token, TOKEN);
    assert_eq!(payload.session_id, "abc");
    assert_eq!(payload.seq, 42);

    socket.resumed(43);
    opener.await.unwrap().unwrap();
    events
        .shard_event(|e| matches!(e, ShardEvent::Resumed { shard_id: 0 }))
        .await;

    assert_eq!(shard.state(), ConnectionState::Connected);
    assert_eq!(shard.session().last_sequence, Some(43));
    assert_eq!(shard.session().session_id.as_deref(), Some("abc"));

    shard.close().await;
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dispatches_arrive_in_order() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, mut events) = Recorder::new();
    let shard = connect_shard(test_config(), single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    socket.expect(OpCode::Identify).await;
    socket.ready("abc", None, [0, 1], 1);
    opener.await.unwrap().unwrap();

    let ready = events.dispatch("READY").await;
    assert_eq!(ready.kind, GatewayEventType::Ready);
    assert_eq!(ready.sequence, Some(1));

    for seq in 2..=6 {
        socket.dispatch("MESSAGE_CREATE", seq, message_payload(7, &format!("message {seq}")));
    }
    for seq in 2..=6 {
        let event = events.dispatch("MESSAGE_CREATE").await;
        assert_eq!(event.shard_id, 0);
        assert_eq!(event.sequence, Some(seq));
        assert_eq!(event.kind, GatewayEventType::MessageCreate);
        assert_eq!(event.data["content"], format!("message {seq}"));
    }
    assert_eq!(shard.session().last_sequence, Some(6));

    shard.close().await;
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_commands_reach_the_socket() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, _events) = Recorder::new();
    let shard = connect_shard(test_config(), single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    socket.expect(OpCode::Identify).await;
    socket.ready("abc", None, [0, 1], 1);
    opener.await.unwrap().unwrap();

    let guild_id = Snowflake::new(41_771_983_423_143_937);
    let nonce = shard
        .request_guild_members(RequestGuildMembersPayload::by_query(guild_id, "", 0))
        .await
        .unwrap();
    let (_, request) = socket.expect(OpCode::RequestGuildMembers).await;
    let payload = request.as_request_guild_members().expect("Request payload");
    assert_eq!(payload.guild_id, guild_id);
    assert_eq!(payload.nonce.as_deref(), Some(nonce.as_str()));

    shard
        .update_presence(PresenceUpdatePayload::new(OnlineStatus::Idle))
        .await
        .unwrap();
    let (_, presence) = socket.expect(OpCode::PresenceUpdate).await;
    assert_eq!(
        presence.as_presence_update().map(|p| p.status),
        Some(OnlineStatus::Idle)
    );

    // The stored presence is advertised by the next Identify
    socket.invalid_session(false);
    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    let (_, identify) = socket.expect(OpCode::Identify).await;
    let identify = identify.as_identify().expect("Identify payload");
    assert_eq!(identify.presence.map(|p| p.status), Some(OnlineStatus::Idle));

    shard.close().await;
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_close_ends_the_session() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, mut events) = Recorder::new();
    let shard = connect_shard(test_config(), single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    socket.expect(OpCode::Identify).await;
    socket.ready("abc", Some(RESUME_URL), [0, 1], 1);
    opener.await.unwrap().unwrap();

    shard.close().await;

    let (_, code) = socket.expect_close().await;
    assert_eq!(code, 1000);
    assert_eq!(shard.state(), ConnectionState::Closed);
    assert!(shard.session().session_id.is_none());
    assert!(shard.failure().is_none());

    events
        .shard_event(|e| matches!(e, ShardEvent::Closed { shard_id: 0 }))
        .await;
    assert!(connections.idle_for(Duration::from_secs(120)).await);
    assert_eq!(gateway.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_reason_reaches_the_server() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, _events) = Recorder::new();
    let shard = connect_shard(test_config(), single(), &gateway, Arc::new(NoopIdentifyGate), recorder);
    let opener = spawn_open(&shard);

    let mut socket = connections.next().await;
    socket.hello(HEARTBEAT_INTERVAL_MS);
    socket.expect(OpCode::Identify).await;
    socket.ready("abc", None, [0, 1], 1);
    opener.await.unwrap().unwrap();

    shard.close_with_reason("maintenance").await;
    shard.close_with_reason("ignored").await;
    assert_eq!(shard.state(), ConnectionState::Closed);

    socket.expect_close().await;
    let close = socket.history().iter().rev().find_map(|frame| match frame {
        ClientFrame::Close { code, reason, .. } => Some((*code, reason.clone())),
        ClientFrame::Message { .. } => None,
    });
    assert_eq!(close, Some((1000, "maintenance".to_string())));
}
