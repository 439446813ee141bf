//! Core contracts between the engine and application logic.

use anyhow::Result;
use ordo_store::StoreError;

use crate::frame::{Command, Event};
use crate::router::EventRouter;

/// Turns one command into zero or more events. Deterministic.
///
/// Receives a read-only view of the state; all mutation happens when the
/// routed events are applied. Unrecognised command content is ignored or
/// answered with a rejection event, never reported as an error. Errors are
/// for broken invariants; the engine logs them, rolls the batch back and
/// moves on to the next command.
pub trait CommandProcessor<S>: Send {
    fn on_command(&mut self, state: &S, command: &Command<'_>, router: &mut EventRouter)
        -> Result<()>;
}

/// Applies one committed event to the state. Pure state updates, no I/O.
///
/// Application appliers also see system events (timer expiry, heartbeats) and
/// ignore what they do not recognise.
pub trait EventApplier<S>: Send {
    fn on_event(&mut self, state: &mut S, event: &Event<'_>) -> Result<()>;
}

impl<S, F> CommandProcessor<S> for F
where
    F: FnMut(&S, &Command<'_>, &mut EventRouter) -> Result<()> + Send,
{
    fn on_command(
        &mut self,
        state: &S,
        command: &Command<'_>,
        router: &mut EventRouter,
    ) -> Result<()> {
        self(state, command, router)
    }
}

impl<S, F> EventApplier<S> for F
where
    F: FnMut(&mut S, &Event<'_>) -> Result<()> + Send,
{
    fn on_event(&mut self, state: &mut S, event: &Event<'_>) -> Result<()> {
        self(state, event)
    }
}

/// Outcome of offering one command to a [`Receiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Appended to the command store with this source sequence.
    Accepted(i64),
    /// The explicit source sequence was not above the last one seen.
    Duplicate,
    /// The command store is full. Offer it again later.
    Backpressure,
}

/// Sink for commands produced by an [`Input`].
pub trait Receiver {
    /// `source_sequence` of `None` asks for the next sequence of the source.
    fn receive(
        &mut self,
        source_id: i32,
        source_sequence: Option<i64>,
        payload_type: i32,
        payload: &[u8],
    ) -> std::result::Result<Received, StoreError>;
}

/// Source of commands, polled once per engine step. Must not block.
pub trait Input: Send {
    /// Offer pending commands to `receiver`. Returns how many were offered.
    fn poll(&mut self, receiver: &mut dyn Receiver) -> Result<usize>;
}
