//! Typed errors for engine construction and the processing loop.

use ordo_store::StoreError;
use thiserror::Error;

use crate::frame::FrameError;

/// Invalid construction-time input. Raised eagerly, never at runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("initial sequence {initial} is below the reserved minimum {minimum}")]
    SequenceBelowMinimum { initial: i64, minimum: i64 },

    #[error("server {server_id} is not a member of {server_ids:?}")]
    NotAMember { server_id: i32, server_ids: Vec<i32> },

    #[error("server membership must not be empty")]
    EmptyMembership,

    #[error("server {0} appears more than once in the membership")]
    DuplicateMember(i32),

    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: i64 },

    #[error("{name} ({min}) must not exceed {max_name} ({max})")]
    OutOfOrder {
        name: &'static str,
        min: i64,
        max_name: &'static str,
        max: i64,
    },

    #[error("plugin {plugin}: {kind} range {range} must be a non-empty range of system types")]
    InvalidRange {
        plugin: String,
        kind: &'static str,
        range: String,
    },

    #[error("{kind} range {first_range} of plugin {first} overlaps {second_range} of plugin {second}")]
    OverlappingRanges {
        kind: &'static str,
        first: String,
        first_range: String,
        second: String,
        second_range: String,
    },

    #[error("store configuration: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Faults raised by the processing loop.
///
/// Business-logic errors never surface here; they go to the exception handler
/// and processing continues. What reaches the caller is fatal.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed frame in store: {0}")]
    Frame(#[from] FrameError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("run loop task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
