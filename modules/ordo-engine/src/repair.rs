//! Startup consistency check for the event store.
//!
//! A batch is complete once its terminal event is written. If the process died
//! between the first and last event of a batch, the store ends in a `Normal`
//! event. Repair closes that batch with a `Rollback` marker so replay discards
//! it and the command is treated as having had no effect.

use std::sync::Arc;

use ordo_store::MessageStore;
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::frame::{
    encode_event, Command, Event, EventHeader, EventType, FrameError, MARKER_PAYLOAD_TYPE,
};
use crate::handler::ExceptionHandler;
use crate::time::TimeSource;

/// What a repair found (or would do).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub source_id: i32,
    pub source_sequence: i64,
    /// Events of the incomplete batch already in the store.
    pub events_discarded: i32,
    /// Sequence of the synthetic rollback event.
    pub rollback_event_sequence: i64,
    /// Whether the incomplete batch belongs to the last command in the command
    /// store. `false` also when there is no command store or it is empty.
    pub matches_last_command: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairStatus {
    Consistent,
    Repaired(RepairReport),
}

pub struct EventStoreRepairer {
    event_store: Arc<dyn MessageStore>,
    command_store: Option<Arc<dyn MessageStore>>,
}

impl EventStoreRepairer {
    pub fn new(event_store: Arc<dyn MessageStore>) -> Self {
        Self {
            event_store,
            command_store: None,
        }
    }

    /// Consult the command store when reporting which command was cut short.
    pub fn with_command_store(mut self, command_store: Arc<dyn MessageStore>) -> Self {
        self.command_store = Some(command_store);
        self
    }

    /// Inspect without modifying. `None` when the store is consistent.
    pub fn check(&self) -> EngineResult<Option<RepairReport>> {
        let Some(last) = self.event_store.last_message()? else {
            debug!("Event store empty, nothing to check");
            return Ok(None);
        };
        let last = Event::wrap(&last)?;
        if last.event_type().is_terminal() {
            return Ok(None);
        }

        Ok(Some(RepairReport {
            source_id: last.source_id(),
            source_sequence: last.source_sequence(),
            events_discarded: last.event_index() + 1,
            rollback_event_sequence: last.event_sequence() + 1,
            matches_last_command: self.last_command_matches(&last)?,
        }))
    }

    /// Close an incomplete trailing batch with a `Rollback` marker and report
    /// it to `handler`. No-op on a consistent store.
    pub fn repair(
        &self,
        time: &dyn TimeSource,
        handler: &dyn ExceptionHandler,
    ) -> EngineResult<RepairStatus> {
        let Some(report) = self.check()? else {
            return Ok(RepairStatus::Consistent);
        };

        let header = EventHeader {
            source_id: report.source_id,
            source_sequence: report.source_sequence,
            event_sequence: report.rollback_event_sequence,
            event_index: report.events_discarded,
            event_time: time.current_time(),
            event_type: EventType::Rollback,
            payload_type: MARKER_PAYLOAD_TYPE,
        };
        let mut appender = self.event_store.appender();
        let mut context = appender.appending()?;
        let length = encode_event(context.buffer(), &header, &[]).map_err(FrameError::from)?;
        context.commit(length)?;

        info!(
            source_id = report.source_id,
            source_sequence = report.source_sequence,
            events_discarded = report.events_discarded,
            "Appended rollback for incomplete batch"
        );
        handler.handle_repair(&report);
        Ok(RepairStatus::Repaired(report))
    }

    fn last_command_matches(&self, last: &Event<'_>) -> EngineResult<bool> {
        let Some(store) = &self.command_store else {
            return Ok(false);
        };
        let Some(bytes) = store.last_message()? else {
            return Ok(false);
        };
        let command = Command::wrap(&bytes)?;
        Ok(command.source_id() == last.source_id()
            && command.source_sequence() == last.source_sequence())
    }
}
