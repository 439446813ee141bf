//! Heartbeat and replication plugins running inside an engine.

use std::sync::Arc;

use anyhow::Result;
use ordo_engine::{
    install, Command, ConfigError, Engine, EngineParts, Event, EventRouter, HeartbeatConfig,
    ManualTimeSource, ReplicationConfig,
};
use ordo_plugins::heartbeat::HEARTBEAT;
use ordo_plugins::replication::{LEADER_CHANGED, PROPOSE_LEADER, REPLICATION_SOURCE_ID};
use ordo_plugins::{
    HeartbeatPlugin, HeartbeatState, ProposeLeader, ReplicationPlugin, ReplicationState,
    ServerConfig,
};
use ordo_store::{InMemoryStore, MessageStore, StoreMode};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Payload types of system events seen by the application applier.
#[derive(Debug, Default)]
struct Seen(Vec<i32>);

type Processor = fn(&Seen, &Command<'_>, &mut EventRouter) -> Result<()>;
type Applier = fn(&mut Seen, &Event<'_>) -> Result<()>;
type SeenEngine = Engine<Seen, Processor, Applier>;

fn ignore(_: &Seen, _: &Command<'_>, _: &mut EventRouter) -> Result<()> {
    Ok(())
}

fn record(state: &mut Seen, event: &Event<'_>) -> Result<()> {
    if event.is_system() {
        state.0.push(event.payload_type());
    }
    Ok(())
}

fn engine_with(plugin: ordo_engine::PluginInstaller, clock: &ManualTimeSource) -> SeenEngine {
    Engine::new(
        EngineParts::builder()
            .command_store(Arc::new(InMemoryStore::new(StoreMode::RemoveOnPoll)) as Arc<dyn MessageStore>)
            .event_store(Arc::new(InMemoryStore::new(StoreMode::KeepOnPoll)) as Arc<dyn MessageStore>)
            .state(Seen::default())
            .processor(ignore as Processor)
            .applier(record as Applier)
            .plugins(vec![plugin])
            .time_source(Arc::new(clock.clone()))
            .build(),
    )
    .unwrap()
}

fn run_until_idle(engine: &mut SeenEngine) {
    for _ in 0..1_000 {
        if engine.step().unwrap() == 0 {
            return;
        }
    }
    panic!("engine did not go idle");
}

// ===========================================================================
// Heartbeat
// ===========================================================================

#[test]
fn heartbeat_interval_must_be_positive() {
    assert!(matches!(
        HeartbeatPlugin::new(0),
        Err(ConfigError::NotPositive { .. })
    ));
    assert!(HeartbeatPlugin::from_config(&HeartbeatConfig { interval_millis: 250 }).is_ok());
}

#[test]
fn heartbeat_is_logged_once_per_interval() {
    let clock = ManualTimeSource::new(1_000);
    let mut engine = engine_with(install(HeartbeatPlugin::new(100).unwrap()), &clock);

    run_until_idle(&mut engine);
    run_until_idle(&mut engine);
    let state = engine.plugin_state::<HeartbeatState>().unwrap();
    assert_eq!(state.count, 1);
    assert_eq!(state.last_heartbeat_time, Some(1_000));

    clock.advance(99);
    run_until_idle(&mut engine);
    assert_eq!(engine.plugin_state::<HeartbeatState>().unwrap().count, 1);

    clock.advance(1);
    run_until_idle(&mut engine);
    let state = engine.plugin_state::<HeartbeatState>().unwrap();
    assert_eq!(state.count, 2);
    assert_eq!(state.last_heartbeat_time, Some(1_100));
    assert_eq!(engine.state().0, vec![HEARTBEAT, HEARTBEAT]);
}

// ===========================================================================
// Replication
// ===========================================================================

#[test]
fn server_must_belong_to_membership() {
    assert!(matches!(
        ServerConfig::new(9, vec![1, 2, 3]),
        Err(ConfigError::NotAMember { .. })
    ));
    assert!(matches!(
        ServerConfig::new(1, vec![]),
        Err(ConfigError::EmptyMembership)
    ));
    assert!(matches!(
        ServerConfig::new(1, vec![1, 2, 1]),
        Err(ConfigError::DuplicateMember(1))
    ));

    let server = ServerConfig::from_config(&ReplicationConfig {
        server_id: 2,
        server_ids: vec![1, 2, 3],
    })
    .unwrap();
    assert_eq!(server.server_id(), 2);
    assert_eq!(server.server_index(), 1);
    assert!(server.is_member(3));
    assert!(!server.is_member(4));
}

fn propose(engine: &mut SeenEngine, candidate_id: i32, term: i64) {
    let payload = ProposeLeader { candidate_id, term }.to_payload().unwrap();
    engine
        .submit(REPLICATION_SOURCE_ID, None, PROPOSE_LEADER, &payload)
        .unwrap();
}

#[test]
fn leadership_follows_newer_terms_only() {
    let clock = ManualTimeSource::new(1_000);
    let server = ServerConfig::new(2, vec![1, 2, 3]).unwrap();
    let mut engine = engine_with(install(ReplicationPlugin::new(server)), &clock);

    propose(&mut engine, 1, 1);
    run_until_idle(&mut engine);
    let state = engine.plugin_state::<ReplicationState>().unwrap();
    assert_eq!(state.leader_id(), Some(1));
    assert!(!state.is_leader());

    propose(&mut engine, 2, 1);
    propose(&mut engine, 9, 5);
    run_until_idle(&mut engine);
    let state = engine.plugin_state::<ReplicationState>().unwrap();
    assert_eq!(state.leader_id(), Some(1), "stale and non-member proposals are ignored");
    assert_eq!(state.term(), 1);

    propose(&mut engine, 2, 2);
    run_until_idle(&mut engine);
    let state = engine.plugin_state::<ReplicationState>().unwrap();
    assert!(state.is_leader());
    assert_eq!(state.term(), 2);
    assert_eq!(engine.state().0, vec![LEADER_CHANGED, LEADER_CHANGED]);
}
