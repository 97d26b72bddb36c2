//! Sharding Tests
//!
//! Several shards behind one manager: guild routing, identify spacing across
//! shards, and failure isolation.
//!
//! Run with: cargo test -p integration-tests --test sharding

use fluxer_core::{OnlineStatus, Snowflake};
use fluxer_gateway::protocol::{PresenceUpdatePayload, RequestGuildMembersPayload};
use async_trait::async_trait;
use fluxer_gateway::{
    ConnectionState, DispatchEvent, EventHandler, FatalKind, GatewayError, IdentifyGate,
    IdentifyLimiter, NoopIdentifyGate, OpCode, ShardEvent, ShardManager,
};
use fluxer_gateway::transport::Connector;
use integration_tests::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Long enough that no heartbeat interferes with a test
const QUIET_HEARTBEAT_MS: u64 = 3_600_000;

struct Cluster {
    manager: Arc<ShardManager>,
    gateway: Arc<MockGateway>,
    connections: Connections,
    /// Server end of each shard's socket, by shard id
    sockets: HashMap<u32, ServerSocket>,
    /// When each shard's Identify arrived
    identified_at: HashMap<u32, Instant>,
    events: EventLog,
}

/// Open `shard_count` shards against the scripted gateway and READY them all
async fn open_cluster(shard_count: u32, identify: Arc<dyn IdentifyLimiter>) -> Cluster {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, events) = Recorder::new();
    let manager = Arc::new(
        ShardManager::new(test_config(), shard_count, identify, recorder)
            .unwrap()
            .with_connector(Arc::clone(&gateway) as Arc<dyn Connector>),
    );

    let opener = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.open_all().await })
    };

    let mut pending = Vec::new();
    for _ in 0..shard_count {
        let socket = connections.next().await;
        socket.hello(QUIET_HEARTBEAT_MS);
        pending.push(socket);
    }

    let mut sockets = HashMap::new();
    let mut identified_at = HashMap::new();
    for mut socket in pending {
        let (at, identify) = socket.expect(OpCode::Identify).await;
        let [shard_id, count] = identify
            .as_identify()
            .and_then(|payload| payload.shard)
            .expect("Identify carries the shard");
        assert_eq!(count, shard_count);

        socket.ready(&format!("session-{shard_id}"), None, [shard_id, count], 1);
        identified_at.insert(shard_id, at);
        sockets.insert(shard_id, socket);
    }

    opener.await.unwrap().unwrap();
    assert_eq!(sockets.len(), shard_count as usize);

    Cluster {
        manager,
        gateway,
        connections,
        sockets,
        identified_at,
        events,
    }
}

/// At most `max` identifies in any refill window, and none closer than one
/// window within the same `shard_id % max` bucket
fn assert_identify_spacing(identified_at: &HashMap<u32, Instant>, max: u32, refill: Duration) {
    let mut times: Vec<Instant> = identified_at.values().copied().collect();
    times.sort();
    for (i, start) in times.iter().enumerate() {
        let in_window = times[i..]
            .iter()
            .take_while(|at| at.duration_since(*start) < refill)
            .count();
        assert!(in_window <= max as usize, "{in_window} identifies within one window");
    }

    let mut buckets: HashMap<u32, Vec<Instant>> = HashMap::new();
    for (shard_id, at) in identified_at {
        buckets.entry(shard_id % max).or_default().push(*at);
    }
    for times in buckets.values_mut() {
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= refill);
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_guild_commands_reach_the_owning_shard() {
    let mut cluster = open_cluster(4, Arc::new(NoopIdentifyGate)).await;

    let guilds = [6u64 << 22, (6 << 22) | 0x3f_ffff, 2 << 22, 41_771_983_423_143_937];
    for raw in guilds {
        let guild_id = Snowflake::new(raw);
        let expected = ((raw >> 22) % 4) as u32;

        for _ in 0..3 {
            assert_eq!(cluster.manager.shard_id_for(guild_id), expected);
        }
        assert_eq!(cluster.manager.route(guild_id).unwrap().shard_id(), expected);

        let nonce = cluster
            .manager
            .request_guild_members(RequestGuildMembersPayload::by_query(guild_id, "", 0))
            .await
            .unwrap();

        let socket = cluster.sockets.get_mut(&expected).unwrap();
        let (_, request) = socket.expect(OpCode::RequestGuildMembers).await;
        let payload = request.as_request_guild_members().unwrap();
        assert_eq!(payload.guild_id, guild_id);
        assert_eq!(payload.nonce, Some(nonce));
    }

    // Any request routed to the wrong shard would arrive before this
    cluster
        .manager
        .update_presence(PresenceUpdatePayload::new(OnlineStatus::Online))
        .await
        .unwrap();
    for socket in cluster.sockets.values_mut() {
        socket.expect(OpCode::PresenceUpdate).await;
    }

    cluster.manager.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_presence_update_reaches_every_shard() {
    let mut cluster = open_cluster(3, Arc::new(NoopIdentifyGate)).await;

    cluster
        .manager
        .update_presence(PresenceUpdatePayload::new(OnlineStatus::Dnd))
        .await
        .unwrap();

    for shard_id in 0..3 {
        let socket = cluster.sockets.get_mut(&shard_id).unwrap();
        let (_, update) = socket.expect(OpCode::PresenceUpdate).await;
        assert_eq!(
            update.as_presence_update().map(|p| p.status),
            Some(OnlineStatus::Dnd)
        );
        let shard = cluster.manager.shard(shard_id).unwrap();
        assert_eq!(shard.presence().map(|p| p.status), Some(OnlineStatus::Dnd));
    }

    cluster.manager.close().await.unwrap();
}

// ============================================================================
// Identify gate
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_identifies_are_spaced_by_the_gate() {
    let gate = IdentifyGate::new(1);
    let refill = gate.refill();
    let cluster = open_cluster(3, Arc::new(gate)).await;

    assert_identify_spacing(&cluster.identified_at, 1, refill);

    let mut times: Vec<Instant> = cluster.identified_at.values().copied().collect();
    times.sort();
    assert_eq!(times[2].duration_since(times[0]), refill * 2);

    cluster.manager.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_identify_buckets_run_concurrently() {
    let gate = IdentifyGate::new(2);
    let refill = gate.refill();
    let cluster = open_cluster(4, Arc::new(gate)).await;

    assert_identify_spacing(&cluster.identified_at, 2, refill);

    // Two rounds of two
    let first = cluster.identified_at.values().min().unwrap();
    let last = cluster.identified_at.values().max().unwrap();
    assert_eq!(last.duration_since(*first), refill);

    cluster.manager.close().await.unwrap();
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fatal_shard_leaves_siblings_running() {
    let mut cluster = open_cluster(2, Arc::new(NoopIdentifyGate)).await;

    cluster
        .sockets
        .get_mut(&0)
        .unwrap()
        .close(4004, "Authentication failed");

    let failed = cluster
        .events
        .shard_event(|e| matches!(e, ShardEvent::Failed(_)))
        .await;
    let ShardEvent::Failed(err) = failed else {
        unreachable!()
    };
    assert_eq!(err.shard_id, 0);
    assert_eq!(err.kind, FatalKind::CloseCode);
    assert_eq!(err.close_code, Some(4004));

    let failed_shard = cluster.manager.shard(0).unwrap();
    let sibling = cluster.manager.shard(1).unwrap();
    assert_eq!(failed_shard.state(), ConnectionState::Closed);
    assert_eq!(sibling.state(), ConnectionState::Connected);

    let on_failed = Snowflake::new(2 << 22);
    let on_sibling = Snowflake::new(3 << 22);
    assert!(matches!(
        cluster.manager.route(on_failed),
        Err(GatewayError::ShardNotRunning(0))
    ));

    cluster
        .manager
        .request_guild_members(RequestGuildMembersPayload::by_query(on_sibling, "a", 10))
        .await
        .unwrap();
    let socket = cluster.sockets.get_mut(&1).unwrap();
    socket.expect(OpCode::RequestGuildMembers).await;

    // The failed shard never comes back on its own
    assert!(cluster.connections.idle_for(Duration::from_secs(600)).await);
    assert_eq!(cluster.gateway.urls().len(), 2);
    assert_eq!(sibling.state(), ConnectionState::Connected);

    cluster.manager.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reopen_replaces_a_failed_shard() {
    let mut cluster = open_cluster(2, Arc::new(NoopIdentifyGate)).await;

    cluster
        .sockets
        .get_mut(&1)
        .unwrap()
        .close(4004, "Authentication failed");
    cluster
        .events
        .shard_event(|e| matches!(e, ShardEvent::Closed { shard_id: 1 }))
        .await;

    let reopen = {
        let manager = Arc::clone(&cluster.manager);
        tokio::spawn(async move { manager.open(&[0, 1]).await })
    };

    let mut socket = cluster.connections.next().await;
    socket.hello(QUIET_HEARTBEAT_MS);
    let (_, identify) = socket.expect(OpCode::Identify).await;
    assert_eq!(identify.as_identify().and_then(|p| p.shard), Some([1, 2]));
    socket.ready("session-1b", None, [1, 2], 1);

    reopen.await.unwrap().unwrap();
    assert_eq!(cluster.manager.shard(1).unwrap().state(), ConnectionState::Connected);
    assert_eq!(cluster.gateway.urls().len(), 3);

    cluster.manager.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_opens_share_one_connection() {
    let (gateway, mut connections) = MockGateway::new();
    let (recorder, _events) = Recorder::new();
    let manager = Arc::new(
        ShardManager::new(test_config(), 2, Arc::new(NoopIdentifyGate), recorder)
            .unwrap()
            .with_connector(Arc::clone(&gateway) as Arc<dyn Connector>),
    );

    let openers: Vec<_> = (0..2)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.open(&[1]).await })
        })
        .collect();

    let mut socket = connections.next().await;
    socket.hello(QUIET_HEARTBEAT_MS);
    socket.expect(OpCode::Identify).await;
    socket.ready("session-1", None, [1, 2], 1);

    for opener in openers {
        opener.await.unwrap().unwrap();
    }
    assert!(connections.idle_for(Duration::from_secs(60)).await);
    assert_eq!(gateway.urls().len(), 1);
    assert_eq!(manager.shards().len(), 1);
    assert_eq!(manager.shard(1).unwrap().state(), ConnectionState::Connected);

    manager.close().await.unwrap();
    assert!(connections.idle_for(Duration::from_secs(60)).await);
}

// ============================================================================
// Shutdown
// ============================================================================

/// Never returns from a `STALL` dispatch, holding its shard's read loop
struct StallingHandler;

#[async_trait]
impl EventHandler for StallingHandler {
    async fn on_dispatch(&self, event: DispatchEvent) {
        if event.event_type == "STALL" {
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_aborts_shards_that_miss_the_shutdown_timeout() {
    let shutdown_timeout = Duration::from_secs(2);
    let (gateway, mut connections) = MockGateway::new();
    let manager = Arc::new(
        ShardManager::new(
            test_config().with_shutdown_timeout(shutdown_timeout),
            2,
            Arc::new(NoopIdentifyGate),
            Arc::new(StallingHandler),
        )
        .unwrap()
        .with_connector(Arc::clone(&gateway) as Arc<dyn Connector>),
    );

    let opener = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.open_all().await })
    };
    let mut sockets = HashMap::new();
    for _ in 0..2 {
        let mut socket = connections.next().await;
        socket.hello(QUIET_HEARTBEAT_MS);
        let (_, identify) = socket.expect(OpCode::Identify).await;
        let [shard_id, count] = identify.as_identify().and_then(|p| p.shard).unwrap();
        socket.ready(&format!("session-{shard_id}"), None, [shard_id, count], 1);
        sockets.insert(shard_id, socket);
    }
    opener.await.unwrap().unwrap();

    sockets[&0].dispatch("STALL", 2, serde_json::json!({}));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = Instant::now();
    let err = manager.close().await.unwrap_err();
    assert!(matches!(err, GatewayError::ShutdownTimeout(ref ids) if ids == &[0]), "{err:?}");
    assert_eq!(started.elapsed(), shutdown_timeout);

    assert_eq!(manager.shard(0).unwrap().state(), ConnectionState::Closed);
    assert_eq!(manager.shard(1).unwrap().state(), ConnectionState::Closed);

    let sibling = sockets.get_mut(&1).unwrap();
    assert_eq!(sibling.expect_close().await.1, 1000);
}
