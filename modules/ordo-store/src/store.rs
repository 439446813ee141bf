//! Store contracts: one append side, any number of read cursors.
//!
//! Messages are opaque byte frames. A store never reorders or duplicates them:
//! every poller observes strict append order.

use tracing::trace;

use crate::types::{PollResult, StoreError, StoreMode, StoreResult};

// ---------------------------------------------------------------------------
// MessageStore
// ---------------------------------------------------------------------------

/// Append-only, replayable log of framed binary messages.
pub trait MessageStore: Send + Sync {
    /// Write handle. Stores serialise physical writes, so several appenders
    /// may exist, but the intended use is one writer per store.
    fn appender(&self) -> Box<dyn Appender>;

    /// Independent read cursor positioned at the first retained message.
    fn poller(&self) -> Box<dyn Poller>;

    fn mode(&self) -> StoreMode;

    /// Number of messages currently retained.
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Copy of the most recently appended message that is still retained.
    fn last_message(&self) -> StoreResult<Option<Vec<u8>>>;
}

// ---------------------------------------------------------------------------
// Append side
// ---------------------------------------------------------------------------

/// Receives the bytes of a committed [`AppendingContext`].
pub trait CommitTarget: Send {
    /// Publish a complete message. Becomes visible to pollers on success.
    fn publish(&mut self, message: &[u8]) -> StoreResult<()>;

    /// Called when a context is dropped or aborted without commit.
    fn discard(&mut self) {}
}

pub trait Appender: CommitTarget {
    /// Copy one complete message into the store.
    fn append(&mut self, message: &[u8]) -> StoreResult<()> {
        self.publish(message)
    }

    /// Acquire a writable region. Nothing becomes visible until
    /// [`AppendingContext::commit`]; fails early when the store is full.
    fn appending(&mut self) -> StoreResult<AppendingContext<'_>>;
}

/// Scoped write reservation.
///
/// Commit publishes atomically. Abort, or dropping the context without
/// committing, leaves the store exactly as it was.
pub struct AppendingContext<'a> {
    target: &'a mut dyn CommitTarget,
    buffer: Vec<u8>,
    completed: bool,
}

impl<'a> AppendingContext<'a> {
    pub fn new(target: &'a mut dyn CommitTarget) -> Self {
        Self {
            target,
            buffer: Vec::new(),
            completed: false,
        }
    }

    pub fn with_capacity(target: &'a mut dyn CommitTarget, capacity: usize) -> Self {
        Self {
            target,
            buffer: Vec::with_capacity(capacity),
            completed: false,
        }
    }

    /// Mutable view of the pending message.
    pub fn buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Publish the first `length` bytes of the buffer as one message.
    pub fn commit(mut self, length: usize) -> StoreResult<()> {
        self.completed = true;
        if length > self.buffer.len() {
            self.target.discard();
            return Err(StoreError::CommitOutOfBounds {
                length,
                available: self.buffer.len(),
            });
        }
        self.target.publish(&self.buffer[..length])
    }

    /// Discard the reservation explicitly.
    pub fn abort(mut self) {
        self.completed = true;
        self.target.discard();
    }
}

impl Drop for AppendingContext<'_> {
    fn drop(&mut self) {
        if !self.completed {
            trace!(bytes = self.buffer.len(), "Appending context dropped without commit");
            self.target.discard();
        }
    }
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Independent read cursor over a store.
///
/// Unless a store documents otherwise, a poller is used from one thread.
pub trait Poller: Send {
    /// Deliver the next message at this poller's position, if any. Returns 1
    /// when the handler consumed it with [`PollResult::Poll`], 0 when nothing
    /// was pending or the handler peeked.
    ///
    /// The slice is only valid for the duration of the callback.
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]) -> PollResult) -> StoreResult<usize>;

    /// Deliver up to `limit` messages one at a time, stopping at the first
    /// [`PollResult::Peek`] or when nothing is left. Returns the number
    /// consumed.
    fn poll_batch(
        &mut self,
        limit: usize,
        handler: &mut dyn FnMut(&[u8]) -> PollResult,
    ) -> StoreResult<usize> {
        let mut consumed = 0;
        while consumed < limit {
            if self.poll(handler)? == 0 {
                break;
            }
            consumed += 1;
        }
        Ok(consumed)
    }

    /// Absolute index of the next message this poller would deliver.
    fn position(&self) -> u64;

    /// Rewind to the first retained message. Returns `false` if the store
    /// cannot rewind (remove-on-poll).
    fn move_to_start(&mut self) -> bool;

    /// Skip everything currently in the store.
    fn move_to_end(&mut self) -> bool;
}
