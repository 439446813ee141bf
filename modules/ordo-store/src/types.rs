//! Core types for the message store. Domain-agnostic.

use serde::Deserialize;
use thiserror::Error;

/// What a poll handler wants done with the message it was just shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Consume the message and advance to the next one.
    Poll,
    /// Leave the message in place and stop this poll call.
    Peek,
}

/// Whether consumed messages survive their first poll.
///
/// Chosen once when the store is built, never per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreMode {
    /// Consumed messages are discarded. One logical consumer.
    RemoveOnPoll,
    /// Messages persist; every new poller replays from the beginning.
    KeepOnPoll,
}

/// Errors raised by stores and their appenders/pollers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bounded store has no room left. The caller decides whether to retry.
    #[error("store is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("message of {got_bytes} bytes exceeds limit of {max_bytes}")]
    MessageTooLarge { max_bytes: usize, got_bytes: usize },

    #[error("commit length {length} exceeds buffer of {available} bytes")]
    CommitOutOfBounds { length: usize, available: usize },

    #[error("corrupt frame at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("unknown store kind: {0}")]
    UnknownKind(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// `true` for conditions a caller may retry later (capacity exhaustion).
    pub fn is_backpressure(&self) -> bool {
        matches!(self, StoreError::Full { .. })
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
