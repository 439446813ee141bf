//! Per-command event accumulator.
//!
//! The processing loop binds the router to one command at a time. Every
//! routed event is stamped with the command's source id and sequence, the next
//! batch index and the next global event sequence, then appended to the event
//! store. The most recent event is held back by one so the last event of the
//! batch can be written as [`EventType::Commit`].

use std::sync::Arc;

use ordo_store::{Appender, StoreError};
use thiserror::Error;
use tracing::trace;

use crate::frame::{
    encode_event, EventHeader, EventType, FrameError, PayloadTooLarge, MARKER_PAYLOAD_TYPE,
    MAX_PAYLOAD_LEN,
};
use crate::sequence::SequenceGenerator;
use crate::time::TimeSource;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no command is bound to the router")]
    Inactive,

    #[error("event store append failed: {0}")]
    StoreFault(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    source_id: i32,
    source_sequence: i64,
}

#[derive(Debug, Clone, Copy)]
struct Held {
    event_index: i32,
    event_sequence: i64,
    event_time: i64,
    payload_type: i32,
}

/// Single writer of the event store. One router per processing loop.
pub struct EventRouter {
    appender: Box<dyn Appender>,
    time: Arc<dyn TimeSource>,
    event_sequence: SequenceGenerator,
    binding: Option<Binding>,
    next_index: i32,
    flushed: i32,
    held: Option<Held>,
    held_payload: Vec<u8>,
    max_payload_bytes: usize,
    fault: Option<StoreError>,
}

impl EventRouter {
    pub fn new(appender: Box<dyn Appender>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            appender,
            time,
            event_sequence: SequenceGenerator::default(),
            binding: None,
            next_index: 0,
            flushed: 0,
            held: None,
            held_payload: Vec::new(),
            max_payload_bytes: MAX_PAYLOAD_LEN,
            fault: None,
        }
    }

    /// Refuse payloads above `max_payload_bytes` at routing time. Capped at
    /// what the frame length field can describe.
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes.min(MAX_PAYLOAD_LEN);
        self
    }

    /// Bind to the command about to be processed and reset the index.
    pub fn init(&mut self, source_id: i32, source_sequence: i64) {
        self.reset();
        self.binding = Some(Binding {
            source_id,
            source_sequence,
        });
    }

    /// Route one event for the bound command. Returns its event sequence.
    pub fn route_event(&mut self, payload_type: i32, payload: &[u8]) -> Result<i64, RouteError> {
        if self.binding.is_none() {
            return Err(RouteError::Inactive);
        }
        if self.fault.is_some() {
            return Err(self.fault_error());
        }
        if payload.len() > self.max_payload_bytes {
            return Err(FrameError::from(PayloadTooLarge(payload.len())).into());
        }
        self.flush_held(EventType::Normal)?;

        let held = Held {
            event_index: self.next_index,
            event_sequence: self.event_sequence.next_sequence(),
            event_time: self.time.current_time(),
            payload_type,
        };
        self.next_index += 1;
        self.held = Some(held);
        self.held_payload.clear();
        self.held_payload.extend_from_slice(payload);
        Ok(held.event_sequence)
    }

    /// Event sequence the next routed event will receive.
    pub fn next_event_sequence(&self) -> i64 {
        self.event_sequence.sequence() + 1
    }

    /// Events routed for the bound command so far.
    pub fn event_count(&self) -> i32 {
        self.next_index
    }

    pub fn source_id(&self) -> Option<i32> {
        self.binding.map(|b| b.source_id)
    }

    pub fn source_sequence(&self) -> Option<i64> {
        self.binding.map(|b| b.source_sequence)
    }

    pub fn is_active(&self) -> bool {
        self.binding.is_some()
    }

    /// Close the batch: the held event becomes `Commit`, or an `AutoCommit`
    /// marker is written when nothing was routed.
    pub fn complete(&mut self) -> Result<(), RouteError> {
        if self.binding.is_none() {
            return Err(RouteError::Inactive);
        }
        if self.held.is_some() {
            self.flush_held(EventType::Commit)
        } else {
            self.write_marker(EventType::AutoCommit, None)
        }
    }

    /// Abandon the batch: drop the held event and close with a `Rollback`
    /// marker so replay discards anything already written.
    pub fn rollback(&mut self) -> Result<(), RouteError> {
        if self.binding.is_none() {
            return Err(RouteError::Inactive);
        }
        let reused = self.held.take().map(|held| held.event_sequence);
        self.held_payload.clear();
        self.write_marker(EventType::Rollback, reused)
    }

    /// Unbind and clear the index. Safe to call on every exit path.
    pub fn reset(&mut self) {
        self.binding = None;
        self.next_index = 0;
        self.flushed = 0;
        self.held = None;
        self.held_payload.clear();
    }

    /// Latched append failure, if any. The loop treats it as fatal.
    pub fn take_fault(&mut self) -> Option<StoreError> {
        self.fault.take()
    }

    /// Fast-forward after replay so new events continue the store's sequence.
    pub fn catch_up_event_sequence(&mut self, last_event_sequence: i64) -> bool {
        self.event_sequence.next_sequence_min(last_event_sequence)
    }

    pub fn last_event_sequence(&self) -> i64 {
        self.event_sequence.sequence()
    }

    fn flush_held(&mut self, event_type: EventType) -> Result<(), RouteError> {
        let Some(held) = self.held.take() else {
            return Ok(());
        };
        let binding = self.binding.ok_or(RouteError::Inactive)?;
        let header = EventHeader {
            source_id: binding.source_id,
            source_sequence: binding.source_sequence,
            event_sequence: held.event_sequence,
            event_index: held.event_index,
            event_time: held.event_time,
            event_type,
            payload_type: held.payload_type,
        };
        let payload = std::mem::take(&mut self.held_payload);
        let result = self.append(&header, &payload);
        self.held_payload = payload;
        self.held_payload.clear();
        result
    }

    /// A dropped held event hands its sequence to the marker so the store
    /// keeps no gaps.
    fn write_marker(
        &mut self,
        event_type: EventType,
        event_sequence: Option<i64>,
    ) -> Result<(), RouteError> {
        let binding = self.binding.ok_or(RouteError::Inactive)?;
        let event_sequence = match event_sequence {
            Some(sequence) => sequence,
            None => self.event_sequence.next_sequence(),
        };
        let header = EventHeader {
            source_id: binding.source_id,
            source_sequence: binding.source_sequence,
            event_sequence,
            event_index: self.flushed,
            event_time: self.time.current_time(),
            event_type,
            payload_type: MARKER_PAYLOAD_TYPE,
        };
        self.append(&header, &[])
    }

    fn append(&mut self, header: &EventHeader, payload: &[u8]) -> Result<(), RouteError> {
        let written = match self.appender.appending() {
            Ok(mut context) => {
                match encode_event(context.buffer(), header, payload) {
                    Ok(length) => context.commit(length),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {
                self.flushed += 1;
                trace!(
                    source_id = header.source_id,
                    source_sequence = header.source_sequence,
                    event_sequence = header.event_sequence,
                    event_index = header.event_index,
                    event_type = ?header.event_type,
                    "Event appended"
                );
                Ok(())
            }
            Err(e) => Err(self.latch(e)),
        }
    }

    fn latch(&mut self, error: StoreError) -> RouteError {
        let message = error.to_string();
        self.fault = Some(error);
        RouteError::StoreFault(message)
    }

    fn fault_error(&self) -> RouteError {
        RouteError::StoreFault(
            self.fault
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        )
    }
}
