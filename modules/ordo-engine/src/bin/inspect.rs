//! Inspects (and optionally repairs) the stores named by the engine config.
//!
//! Reads `ORDO_CONFIG` / `ORDO_*` like the engine does, checks the event
//! store for an incomplete trailing batch, replays it without state and prints
//! what it found.
//!
//! Usage: ordo-inspect [--repair]

use anyhow::{Context, Result};
use ordo_engine::{
    replay, EngineConfig, Event, EventStoreRepairer, LoggingExceptionHandler, RepairStatus,
    SystemTimeSource,
};
use ordo_store::{PollResult, StoreRegistry};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ordo=info".parse()?))
        .init();

    let repair = std::env::args().skip(1).any(|arg| arg == "--repair");
    let config = EngineConfig::from_env()?;
    let registry = StoreRegistry::with_builtins();
    let command_store = registry
        .create(&config.command_store)
        .context("Failed to open command store")?;
    let event_store = registry
        .create(&config.event_store)
        .context("Failed to open event store")?;

    let repairer = EventStoreRepairer::new(event_store.clone()).with_command_store(command_store.clone());
    if repair {
        match repairer.repair(&SystemTimeSource, &LoggingExceptionHandler)? {
            RepairStatus::Consistent => println!("Event store consistent, nothing to repair."),
            RepairStatus::Repaired(report) => println!("Repaired: {report:?}"),
        }
    } else if let Some(report) = repairer.check()? {
        println!("Incomplete trailing batch (run with --repair to fix): {report:?}");
    }

    let mut counts = [0usize; 4];
    let mut poller = event_store.poller();
    let mut malformed = 0usize;
    loop {
        let polled = poller.poll(&mut |bytes| {
            match Event::wrap(bytes) {
                Ok(event) => counts[event.event_type().code() as usize] += 1,
                Err(_) => malformed += 1,
            }
            PollResult::Poll
        })?;
        if polled == 0 {
            break;
        }
    }

    let progress = replay(
        event_store.as_ref(),
        &mut (),
        &mut |_: &mut (), _: &Event<'_>| -> Result<()> { Ok(()) },
        &LoggingExceptionHandler,
    )?;

    println!("Commands stored:      {}", command_store.size());
    println!("Events stored:        {}", event_store.size());
    println!(
        "  normal {} / commit {} / auto-commit {} / rollback {} / malformed {}",
        counts[0], counts[1], counts[2], counts[3], malformed
    );
    println!("Last event sequence:  {}", progress.last_event_sequence());
    println!("Applied per source:");
    for (source_id, sequence) in progress.sources() {
        println!("  source {source_id:>6}: {sequence}");
    }
    Ok(())
}
