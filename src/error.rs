use crate::action::Action;
use std::io;
use std::path::PathBuf;

/// Failure reported by a [`Storage`](crate::Storage) backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Reading or writing the value behind `key` failed.
    #[error("storage I/O error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    /// The storage location could not be opened or locked.
    #[error("failed to open storage at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A backend-specific failure that does not map onto an I/O error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn io(key: &str, source: io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Failure of an [`EventStore`](crate::EventStore) operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing capability failed on read or write.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A value exists under the log key but is not a JSON array of events.
    #[error("log under key '{key}' is malformed: {source}")]
    MalformedLog {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The log could not be serialized before writing.
    #[error("failed to serialize log under key '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The writer task is gone (its runtime shut down).
    #[error("event store writer has shut down")]
    Closed,

    /// The store was opened outside a Tokio runtime.
    #[error("event store requires a Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl StoreError {
    /// Short, stable identifier for this error, used in dispatched failure actions.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Storage(_) => "storage",
            StoreError::MalformedLog { .. } => "malformed_log",
            StoreError::Serialize { .. } => "serialize",
            StoreError::Closed => "closed",
            StoreError::NoRuntime(_) => "no_runtime",
        }
    }
}

/// Returned when converting an [`Action`] that lacks a well-formed
/// `meta.eventSourcing` envelope into an [`EventAction`](crate::EventAction).
///
/// The rejected action is handed back unchanged.
#[derive(Debug, thiserror::Error)]
#[error("action is not an event: missing or malformed meta.eventSourcing envelope")]
pub struct NotAnEvent(pub Action);
