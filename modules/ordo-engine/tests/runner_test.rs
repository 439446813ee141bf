//! Run loop: start, feed through a transport, stop, join.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ordo_engine::{
    encode_transport_command, BackoffIdle, Command, Engine, EngineParts, Event, EventRouter,
    IdleConfig, Input, MessageSender, QueueTransport, Runner, TransportInput,
};
use ordo_store::{InMemoryStore, MessageStore, StoreMode};

const ADD: i32 = 1;
const ADDED: i32 = 2;

fn process(_: &i64, command: &Command<'_>, router: &mut EventRouter) -> Result<()> {
    if command.payload_type() == ADD {
        router.route_event(ADDED, command.payload())?;
    }
    Ok(())
}

fn apply(total: &mut i64, event: &Event<'_>) -> Result<()> {
    if event.payload_type() == ADDED {
        *total += i64::from(event.payload()[0]);
    }
    Ok(())
}

fn fast_idle() -> BackoffIdle {
    BackoffIdle::new(&IdleConfig {
        spin_steps: 1,
        yield_steps: 1,
        min_park_micros: 100,
        max_park_micros: 1_000,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_processes_transport_input_until_stopped() {
    let queue = QueueTransport::new();
    let mut sender = queue.sender();

    let engine = Engine::new(
        EngineParts::builder()
            .command_store(Arc::new(InMemoryStore::new(StoreMode::RemoveOnPoll)) as Arc<dyn MessageStore>)
            .event_store(Arc::new(InMemoryStore::new(StoreMode::KeepOnPoll)) as Arc<dyn MessageStore>)
            .state(0i64)
            .processor(process)
            .applier(apply)
            .inputs(vec![Box::new(TransportInput::new(5, queue.receiver())) as Box<dyn Input>])
            .build(),
    )
    .unwrap();

    let mut handle = Runner::start(engine, fast_idle());
    assert!(handle.is_running());

    for value in 1..=4u8 {
        sender.send(&encode_transport_command(ADD, &[value])).unwrap();
    }

    let mut waited = 0;
    while queue.pending() > 0 && waited < 200 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += 1;
    }
    // Allow the last command to be processed and applied.
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.stop();
    let engine = handle
        .join(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("run loop should stop within the timeout");

    assert!(!handle.is_running());
    assert_eq!(*engine.state(), 10);
    assert_eq!(engine.progress().applied_sequence(5), 4);
}

#[tokio::test]
async fn join_twice_is_an_error() {
    let engine = Engine::new(
        EngineParts::builder()
            .command_store(Arc::new(InMemoryStore::new(StoreMode::RemoveOnPoll)) as Arc<dyn MessageStore>)
            .event_store(Arc::new(InMemoryStore::new(StoreMode::KeepOnPoll)) as Arc<dyn MessageStore>)
            .state(0i64)
            .processor(process)
            .applier(apply)
            .build(),
    )
    .unwrap();

    let mut handle = Runner::start(engine, fast_idle());
    handle.stop();
    assert!(handle.join(Duration::from_secs(5)).await.unwrap().is_some());
    assert!(handle.join(Duration::from_secs(1)).await.is_err());
}
