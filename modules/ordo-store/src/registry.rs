//! Store selection by configured kind.
//!
//! A store kind string maps to a constructor function registered up front.
//! Applications add their own kinds with [`StoreRegistry::register`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::file::{FileStore, FileStoreOptions, DEFAULT_MAX_MESSAGE_BYTES};
use crate::memory::InMemoryStore;
use crate::store::MessageStore;
use crate::types::{StoreError, StoreMode, StoreResult};

pub const MEMORY_KIND: &str = "memory";
pub const FILE_KIND: &str = "file";

/// One `[command_store]` / `[event_store]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_mode")]
    pub mode: StoreMode,
    /// Message bound for in-memory stores. Unbounded when absent.
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Log file for file stores.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub sync_on_commit: bool,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_kind() -> String {
    MEMORY_KIND.to_string()
}

fn default_mode() -> StoreMode {
    StoreMode::KeepOnPoll
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

impl StoreConfig {
    pub fn memory(mode: StoreMode) -> Self {
        Self {
            kind: MEMORY_KIND.to_string(),
            mode,
            capacity: None,
            path: None,
            sync_on_commit: false,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: FILE_KIND.to_string(),
            mode: StoreMode::KeepOnPoll,
            capacity: None,
            path: Some(path.into()),
            sync_on_commit: false,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Reject values no store kind accepts.
    pub fn validate(&self) -> StoreResult<()> {
        if self.capacity == Some(0) {
            return Err(StoreError::Config("capacity must be positive".to_string()));
        }
        if self.max_message_bytes == 0 {
            return Err(StoreError::Config(
                "max_message_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub type StoreFactory = fn(&StoreConfig) -> StoreResult<Arc<dyn MessageStore>>;

/// Map from store kind to constructor.
#[derive(Clone)]
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `memory` and `file` kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(MEMORY_KIND, create_memory_store);
        registry.register(FILE_KIND, create_file_store);
        registry
    }

    /// Add or replace a kind.
    pub fn register(&mut self, kind: impl Into<String>, factory: StoreFactory) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, config: &StoreConfig) -> StoreResult<Arc<dyn MessageStore>> {
        config.validate()?;
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| StoreError::UnknownKind(config.kind.clone()))?;
        factory(config)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn create_memory_store(config: &StoreConfig) -> StoreResult<Arc<dyn MessageStore>> {
    let store = match config.capacity {
        Some(capacity) => InMemoryStore::bounded(config.mode, capacity)?,
        None => InMemoryStore::new(config.mode),
    };
    Ok(Arc::new(store))
}

fn create_file_store(config: &StoreConfig) -> StoreResult<Arc<dyn MessageStore>> {
    if config.mode != StoreMode::KeepOnPoll {
        return Err(StoreError::Config(
            "file stores only support keep-on-poll".to_string(),
        ));
    }
    let path = config
        .path
        .as_ref()
        .ok_or_else(|| StoreError::Config("file store requires a path".to_string()))?;
    let store = FileStore::open(
        path,
        FileStoreOptions {
            sync_on_commit: config.sync_on_commit,
            max_message_bytes: config.max_message_bytes,
        },
    )?;
    Ok(Arc::new(store))
}
