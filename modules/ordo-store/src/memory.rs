//! In-memory message store.
//!
//! Messages are held as shared immutable slices, so a poll clones a pointer
//! under the lock and runs the handler without holding it. Handlers may
//! therefore append to the same store without deadlocking.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::store::{Appender, AppendingContext, CommitTarget, MessageStore, Poller};
use crate::types::{PollResult, StoreError, StoreMode, StoreResult};

/// Heap-backed store, optionally bounded. Thread-safe.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

struct Shared {
    mode: StoreMode,
    capacity: Option<usize>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    messages: VecDeque<Arc<[u8]>>,
    /// Absolute index of `messages[0]`. Advances as remove-on-poll consumes.
    first_index: u64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_capacity(&self, inner: &Inner) -> StoreResult<()> {
        match self.capacity {
            Some(capacity) if inner.messages.len() >= capacity => {
                Err(StoreError::Full { capacity })
            }
            _ => Ok(()),
        }
    }
}

impl InMemoryStore {
    /// Unbounded store.
    pub fn new(mode: StoreMode) -> Self {
        Self::build(mode, None)
    }

    /// Store that refuses appends once `capacity` messages are retained.
    pub fn bounded(mode: StoreMode, capacity: usize) -> StoreResult<Self> {
        if capacity == 0 {
            return Err(StoreError::Config(
                "in-memory store capacity must be positive".to_string(),
            ));
        }
        Ok(Self::build(mode, Some(capacity)))
    }

    fn build(mode: StoreMode, capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                mode,
                capacity,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }

    /// Copy of every retained message, oldest first (for test assertions).
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .messages
            .iter()
            .map(|m| m.to_vec())
            .collect()
    }
}

impl MessageStore for InMemoryStore {
    fn appender(&self) -> Box<dyn Appender> {
        Box::new(MemoryAppender {
            shared: self.shared.clone(),
        })
    }

    fn poller(&self) -> Box<dyn Poller> {
        let position = self.shared.lock().first_index;
        Box::new(MemoryPoller {
            shared: self.shared.clone(),
            position,
        })
    }

    fn mode(&self) -> StoreMode {
        self.shared.mode
    }

    fn size(&self) -> usize {
        self.shared.lock().messages.len()
    }

    fn last_message(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.shared.lock().messages.back().map(|m| m.to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Appender
// ---------------------------------------------------------------------------

struct MemoryAppender {
    shared: Arc<Shared>,
}

impl CommitTarget for MemoryAppender {
    fn publish(&mut self, message: &[u8]) -> StoreResult<()> {
        let mut inner = self.shared.lock();
        self.shared.check_capacity(&inner)?;
        inner.messages.push_back(Arc::from(message));
        Ok(())
    }
}

impl Appender for MemoryAppender {
    fn appending(&mut self) -> StoreResult<AppendingContext<'_>> {
        {
            let inner = self.shared.lock();
            self.shared.check_capacity(&inner)?;
        }
        Ok(AppendingContext::new(self))
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

struct MemoryPoller {
    shared: Arc<Shared>,
    position: u64,
}

impl Poller for MemoryPoller {
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8]) -> PollResult) -> StoreResult<usize> {
        let (position, message) = {
            let inner = self.shared.lock();
            let position = self.position.max(inner.first_index);
            let offset = (position - inner.first_index) as usize;
            match inner.messages.get(offset) {
                Some(message) => (position, message.clone()),
                None => {
                    self.position = position;
                    return Ok(0);
                }
            }
        };

        match handler(&message) {
            PollResult::Peek => {
                self.position = position;
                Ok(0)
            }
            PollResult::Poll => {
                if self.shared.mode == StoreMode::RemoveOnPoll {
                    let mut inner = self.shared.lock();
                    if inner.first_index == position {
                        inner.messages.pop_front();
                        inner.first_index += 1;
                    }
                }
                self.position = position + 1;
                Ok(1)
            }
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn move_to_start(&mut self) -> bool {
        if self.shared.mode == StoreMode::RemoveOnPoll {
            return false;
        }
        self.position = self.shared.lock().first_index;
        true
    }

    fn move_to_end(&mut self) -> bool {
        let mut inner = self.shared.lock();
        let end = inner.first_index + inner.messages.len() as u64;
        if self.shared.mode == StoreMode::RemoveOnPoll {
            inner.messages.clear();
            inner.first_index = end;
        }
        self.position = end;
        true
    }
}
