//! Generic, domain-agnostic append-only message store.
//!
//! Stores opaque byte frames in strict append order. One write side
//! ([`Appender`]) and any number of independent read cursors ([`Poller`]).
//! Zero knowledge of commands, events, or any engine concept.

pub mod file;
pub mod memory;
pub mod registry;
pub mod store;
pub mod types;

pub use file::{FileStore, FileStoreOptions};
pub use memory::InMemoryStore;
pub use registry::{StoreConfig, StoreFactory, StoreRegistry};
pub use store::{Appender, AppendingContext, CommitTarget, MessageStore, Poller};
pub use types::{PollResult, StoreError, StoreMode, StoreResult};
