mod common;

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use tenebra::coordinator::messages::{
    HeartbeatRequest, HeartbeatResponse, Message, ShardToInitialize, ShardToSplit,
};
use tenebra::manager::transport::{Address, Envelope, InProcessTransport, Transport};
use tenebra::manager::ShardManager;
use tenebra::{Config, HlcClock, ManagerConfig, NameIdMapper, ShardError};
use uuid::Uuid;

struct Fixture {
    clock: Arc<HlcClock>,
    transport: Arc<InProcessTransport>,
    coordinator_inbox: Receiver<Envelope>,
    manager: ShardManager<InProcessTransport>,
}

fn fixture() -> Fixture {
    let clock = Arc::new(HlcClock::new());
    let transport = Arc::new(InProcessTransport::new());
    // Generous deadline so a slow test runner never expires a heartbeat
    // between our receive and our response.
    transport.set_request_timeout(Duration::from_secs(10));
    let coordinator_uuid = Uuid::new_v4();
    let coordinator_inbox = transport.register(coordinator_uuid);
    let manager = ShardManager::new(
        Address::local(Uuid::new_v4()),
        Address::local(coordinator_uuid),
        Arc::clone(&transport),
        ManagerConfig {
            worker_threads: 2,
            cron_interval_min: Duration::from_millis(10),
            cron_interval_max: Duration::from_millis(20),
            heartbeat_deadline: Duration::from_millis(100),
        },
        Config::for_testing(),
        Arc::clone(&clock),
        NameIdMapper::new(),
    );
    Fixture {
        clock,
        transport,
        coordinator_inbox,
        manager,
    }
}

fn next_heartbeat(fixture: &Fixture, timeout: Duration) -> (u64, HeartbeatRequest) {
    let deadline = Instant::now() + timeout;
    loop {
        fixture.manager.cron();
        match fixture
            .coordinator_inbox
            .recv_timeout(Duration::from_millis(25))
        {
            Ok(envelope) => match envelope.message {
                Message::HeartbeatRequest(request) => return (envelope.request_id, request),
                other => panic!("unexpected coordinator message: {other:?}"),
            },
            Err(_) if Instant::now() < deadline => continue,
            Err(err) => panic!("no heartbeat before deadline: {err}"),
        }
    }
}

fn respond(fixture: &Fixture, request_id: u64, response: HeartbeatResponse) {
    fixture
        .transport
        .respond(request_id, Message::HeartbeatResponse(response));
}

#[test]
fn heartbeats_flow_and_initialize_shards() {
    let fixture = fixture();
    let (request_id, request) = next_heartbeat(&fixture, Duration::from_secs(2));
    assert!(request.initialized_rsms.is_empty());
    assert!(request.suggested_splits.is_empty());

    let shard_uuid = Uuid::new_v4();
    respond(
        &fixture,
        request_id,
        HeartbeatResponse {
            retry_leader: None,
            success: true,
            acknowledged_initialized_rsms: vec![],
            shards_to_initialize: vec![ShardToInitialize {
                uuid: shard_uuid,
                label_id: PRIMARY_LABEL,
                min_key: pk(i64::MIN),
                schema: int_schema(),
                shard_version: fixture.clock.now(),
            }],
            shards_to_split: vec![],
        },
    );

    let deadline = Instant::now() + Duration::from_secs(2);
    while !fixture.manager.hosts_shard(shard_uuid) {
        assert!(Instant::now() < deadline, "shard never initialized");
        fixture.manager.cron();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(fixture.manager.unconfirmed_shard_count(), 1);

    // The next heartbeat reports it; the acknowledgment clears it.
    let (request_id, request) = next_heartbeat(&fixture, Duration::from_secs(2));
    assert!(request
        .initialized_rsms
        .iter()
        .any(|(uuid, _)| *uuid == shard_uuid));
    respond(
        &fixture,
        request_id,
        HeartbeatResponse {
            retry_leader: None,
            success: true,
            acknowledged_initialized_rsms: vec![shard_uuid],
            shards_to_initialize: vec![],
            shards_to_split: vec![],
        },
    );
    let deadline = Instant::now() + Duration::from_secs(2);
    while fixture.manager.unconfirmed_shard_count() != 0 {
        assert!(Instant::now() < deadline, "acknowledgment never applied");
        fixture.manager.cron();
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn leader_redirects_are_followed() {
    let fixture = fixture();
    let new_leader_uuid = Uuid::new_v4();
    let new_leader_inbox = fixture.transport.register(new_leader_uuid);

    let (request_id, _) = next_heartbeat(&fixture, Duration::from_secs(2));
    respond(
        &fixture,
        request_id,
        HeartbeatResponse {
            retry_leader: Some(Address::local(new_leader_uuid)),
            success: false,
            ..HeartbeatResponse::default()
        },
    );

    // Subsequent heartbeats land at the new leader.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        fixture.manager.cron();
        if let Ok(envelope) = new_leader_inbox.recv_timeout(Duration::from_millis(25)) {
            assert!(matches!(envelope.message, Message::HeartbeatRequest(_)));
            break;
        }
        assert!(Instant::now() < deadline, "redirect never took effect");
    }
}

#[test]
fn grown_shards_suggest_splits_and_split_on_command() {
    let fixture = fixture();

    // Host a shard directly and grow it past the split threshold.
    let shard_uuid = Uuid::new_v4();
    let shard = test_shard_with_config(&fixture.clock, Config::for_testing());
    seed_vertices(&shard, &fixture.clock, &(1..=10).collect::<Vec<_>>());
    let old_version = shard.version();
    fixture.manager.host_shard(shard_uuid, shard);

    // Wait for the workers' cron to surface the suggestion in a heartbeat.
    let deadline = Instant::now() + Duration::from_secs(5);
    let (request_id, suggestion) = loop {
        let (request_id, request) = next_heartbeat(&fixture, Duration::from_secs(2));
        if let Some(suggestion) = request.suggested_splits.first() {
            break (request_id, suggestion.clone());
        }
        respond(&fixture, request_id, HeartbeatResponse::default());
        assert!(Instant::now() < deadline, "no split suggestion surfaced");
        thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(suggestion.shard_uuid, shard_uuid);
    assert_eq!(suggestion.split_key, pk(6));

    // Command the split the way the coordinator would.
    let successor_uuid = Uuid::new_v4();
    respond(
        &fixture,
        request_id,
        HeartbeatResponse {
            retry_leader: None,
            success: true,
            acknowledged_initialized_rsms: vec![],
            shards_to_initialize: vec![],
            shards_to_split: vec![ShardToSplit {
                uuid_mapping: vec![(shard_uuid, successor_uuid)],
                split_key: suggestion.split_key.clone(),
                old_shard_version: old_version,
                new_lhs_shard_version: fixture.clock.now(),
                new_rhs_shard_version: fixture.clock.now(),
            }],
        },
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while !fixture.manager.hosts_shard(successor_uuid) {
        assert!(Instant::now() < deadline, "split successor never hosted");
        fixture.manager.cron();
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn stale_shard_map_versions_are_rejected() {
    let fixture = fixture();
    let manager_address = fixture.manager.address().clone();
    let shard_uuid = Uuid::new_v4();
    fixture
        .manager
        .host_shard(shard_uuid, test_shard(&fixture.clock));

    let envelope = |version: u64| Envelope {
        message: Message::ShutDown,
        request_id: 0,
        to: manager_address.with_uuid(shard_uuid),
        from: manager_address.clone(),
        shard_map_version: version,
    };

    assert!(fixture.manager.route(envelope(5)).is_ok());
    let err = fixture.manager.route(envelope(3)).unwrap_err();
    assert!(matches!(
        err,
        ShardError::StaleShardMap {
            observed: 3,
            current: 5
        }
    ));
    assert!(fixture.manager.route(envelope(5)).is_ok());

    // Envelopes for another node are refused outright.
    let mut foreign = envelope(9);
    foreign.to.port = foreign.to.port.wrapping_add(1);
    assert!(fixture.manager.route(foreign).is_err());
}
