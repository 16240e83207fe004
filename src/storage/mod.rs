//! The durable key-value capability the event store is built on.

mod file;
mod memory;

pub use file::{FileStorage, LockMode, key_file_name};
pub use memory::MemoryStorage;

use crate::error::StorageError;
use async_trait::async_trait;

/// Asynchronous string key-value storage.
///
/// Any medium can back it: process memory, files, a network service. A key
/// that was never written (or was removed) reads as `None`, which is not an
/// error.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`.
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete the value under `key`. Removing a missing key succeeds.
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}
