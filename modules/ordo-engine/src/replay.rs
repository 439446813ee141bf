//! Batch-aware application of events read from the event store.
//!
//! Events of one batch are contiguous in the store. They are buffered until the
//! batch's terminal event arrives: `Commit` applies them, `Rollback` drops
//! them, `AutoCommit` has nothing to apply. Either way the batch is then marked
//! applied in [`ReplayProgress`], and any later read of the same batch is
//! skipped.

use ordo_store::{MessageStore, PollResult};
use tracing::{debug, info, trace};

use crate::error::{EngineError, EngineResult};
use crate::frame::{Event, EventType, FrameError};
use crate::handler::ExceptionHandler;
use crate::progress::ReplayProgress;
use crate::traits::EventApplier;

#[derive(Debug, Default)]
pub(crate) struct BatchTracker {
    batch: Option<(i32, i64)>,
    pending: Vec<Vec<u8>>,
}

impl BatchTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one event in store order. `apply` is called for every event that
    /// takes effect, in order, once its batch has committed.
    pub(crate) fn on_event(
        &mut self,
        event: &Event<'_>,
        progress: &mut ReplayProgress,
        apply: &mut dyn FnMut(&Event<'_>),
    ) -> Result<(), FrameError> {
        let source_id = event.source_id();
        let source_sequence = event.source_sequence();
        progress.observe_event_sequence(event.event_sequence());

        if progress.is_applied(source_id, source_sequence) {
            trace!(source_id, source_sequence, "Skipping event of applied batch");
            return Ok(());
        }

        if self.batch != Some((source_id, source_sequence)) {
            if let Some((stale_source, stale_sequence)) = self.batch.take() {
                debug!(
                    source_id = stale_source,
                    source_sequence = stale_sequence,
                    dropped = self.pending.len(),
                    "Batch superseded before its terminal event"
                );
            }
            self.pending.clear();
            self.batch = Some((source_id, source_sequence));
        }

        match event.event_type() {
            EventType::Normal => {
                self.pending.push(event.as_bytes().to_vec());
                return Ok(());
            }
            EventType::Commit => {
                for bytes in self.pending.drain(..) {
                    apply(&Event::wrap(&bytes)?);
                }
                apply(event);
            }
            EventType::AutoCommit => {}
            EventType::Rollback => {
                trace!(
                    source_id,
                    source_sequence,
                    dropped = self.pending.len(),
                    "Batch rolled back"
                );
            }
        }

        self.pending.clear();
        self.batch = None;
        progress.mark_applied(source_id, source_sequence, event.event_sequence());
        Ok(())
    }

    /// Events buffered for the open batch.
    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Rebuild `state` from every event in `store` using a fresh poller.
///
/// Applier errors go to `handler` and replay continues. Returns the progress
/// reached, which tells the caller where live processing picks up.
pub fn replay<S>(
    store: &dyn MessageStore,
    state: &mut S,
    applier: &mut dyn EventApplier<S>,
    handler: &dyn ExceptionHandler,
) -> EngineResult<ReplayProgress> {
    let mut progress = ReplayProgress::new();
    let mut tracker = BatchTracker::new();
    let mut poller = store.poller();
    let mut fault: Option<EngineError> = None;
    let mut events = 0usize;

    loop {
        let polled = poller.poll(&mut |bytes| {
            let event = match Event::wrap(bytes) {
                Ok(event) => event,
                Err(e) => {
                    fault = Some(e.into());
                    return PollResult::Peek;
                }
            };
            let mut apply = |event: &Event<'_>| {
                if let Err(e) = applier.on_event(state, event) {
                    handler.handle_event_error(event, &e);
                }
            };
            if let Err(e) = tracker.on_event(&event, &mut progress, &mut apply) {
                fault = Some(e.into());
                return PollResult::Peek;
            }
            PollResult::Poll
        })?;

        if let Some(e) = fault.take() {
            return Err(e);
        }
        if polled == 0 {
            break;
        }
        events += polled;
    }

    info!(
        events,
        last_event_sequence = progress.last_event_sequence(),
        open_batch_events = tracker.pending(),
        "Replay finished"
    );
    Ok(progress)
}
