//! Declarative configuration for the event-sourcing middleware.
//!
//! The builder on [`EventSourcingMiddleware`] is the primary API. This module
//! covers the case where the key and backend come from a settings file:
//!
//! ```
//! use eventstash::config::{EventSourcingConfig, StorageConfig};
//!
//! let config: EventSourcingConfig = serde_json::from_str(
//!     r#"{ "key": "todos", "storage": { "type": "file", "dir": "/var/lib/todos" } }"#,
//! ).unwrap();
//! assert_eq!(config.key, "todos");
//! assert!(matches!(config.storage, StorageConfig::File { .. }));
//! ```

use crate::error::{StorageError, StoreError};
use crate::middleware::EventSourcingMiddleware;
use crate::storage::{FileStorage, LockMode, MemoryStorage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for one event-sourcing middleware instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSourcingConfig {
    /// Storage key the event log lives under.
    pub key: String,

    /// Backing storage. In-process memory when omitted.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Which [`Storage`](crate::Storage) backend to use.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    Memory,
    File {
        dir: PathBuf,
        /// Take an exclusive lock on `dir` (default `true`).
        #[serde(default = "default_lock")]
        lock: bool,
    },
}

fn default_lock() -> bool {
    true
}

impl EventSourcingConfig {
    pub fn new(key: impl Into<String>) -> Self {
        EventSourcingConfig {
            key: key.into(),
            storage: StorageConfig::default(),
        }
    }

    /// Open the configured storage and build the middleware.
    ///
    /// # Errors
    ///
    /// Fails if the storage directory cannot be opened or locked, or when
    /// called outside a Tokio runtime.
    pub fn build(self) -> Result<EventSourcingMiddleware, StoreError> {
        let builder = EventSourcingMiddleware::builder(self.key);
        let builder = match self.storage {
            StorageConfig::Memory => builder.storage(MemoryStorage::new()),
            StorageConfig::File { dir, lock } => {
                let mode = if lock {
                    LockMode::Exclusive
                } else {
                    LockMode::None
                };
                let storage = FileStorage::open_with_lock(&dir, mode)
                    .map_err(|source| StorageError::Open { path: dir, source })?;
                builder.storage(storage)
            }
        };
        builder.build()
    }
}
