//! Storage abstraction
//!
//! Every repository reads and writes artifacts through the [`Storage`] trait: a
//! flat key-value store addressed by hierarchical [`Key`]s holding [`Content`]
//! bodies. Backends and decorators:
//!
//! - [`InMemoryStorage`]: ordered in-process map, used for tests and scratch data
//! - [`FileStorage`]: a directory on the local filesystem
//! - [`SubStorage`]: every key of another storage under a fixed prefix
//! - [`LoggingStorage`]: logs each operation before delegating
//!
//! Read-modify-write of metadata documents goes through [`ValuePipeline`], which
//! holds the per-key lock of the storage instance for the whole cycle.

mod config;
mod factory;
mod fs;
mod lock;
mod logging;
mod memory;
mod pipeline;
mod sub;

pub use self::config::StorageConfig;
pub use self::factory::{StorageConstructor, StorageFactories, StorageResolver};
pub use self::fs::FileStorage;
pub use self::lock::{KeyGuard, KeyLocks};
pub use self::logging::LoggingStorage;
pub use self::memory::InMemoryStorage;
pub use self::pipeline::ValuePipeline;
pub use self::sub::SubStorage;

use crate::content::Content;
use crate::error::Result;
use crate::key::Key;
use async_trait::async_trait;
use std::sync::Arc;

/// Shared handle to a storage instance
pub type StorageHandle = Arc<dyn Storage>;

/// Asynchronous key-value content store
///
/// # Absence
/// [`value`](Self::value), [`size`](Self::size), [`move_to`](Self::move_to) and
/// [`delete`](Self::delete) fail with [`NotFound`](crate::VaultError::NotFound)
/// when the key is absent. [`exists`](Self::exists), [`list`](Self::list) and
/// [`delete_all`](Self::delete_all) never fail because of absence.
///
/// # Examples
///
/// ```
/// use pkgvault::{Content, Key, Storage, InMemoryStorage};
///
/// # async fn example() -> pkgvault::Result<()> {
/// let storage = InMemoryStorage::new();
/// let key = Key::new("org/example/lib/1.0/lib-1.0.jar");
/// storage.save(&key, Content::from_bytes("jar bytes")).await?;
/// assert!(storage.exists(&key).await?);
/// assert_eq!(storage.size(&key).await?, 9);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Storage: Send + Sync {
    /// Human-readable description of the backend, for logs
    fn identifier(&self) -> String;

    /// Whether a value is stored at `key`
    async fn exists(&self, key: &Key) -> Result<bool>;

    /// All keys whose segments start with the segments of `prefix`
    ///
    /// Keys are returned in lexicographic segment order.
    async fn list(&self, prefix: &Key) -> Result<Vec<Key>>;

    /// Store `content` at `key`, replacing any existing value
    async fn save(&self, key: &Key, content: Content) -> Result<()>;

    /// Read the value stored at `key`
    async fn value(&self, key: &Key) -> Result<Content>;

    /// Move a value to another key, overwriting the destination
    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()>;

    /// Remove the value stored at `key`
    async fn delete(&self, key: &Key) -> Result<()>;

    /// Remove every value under `prefix`
    ///
    /// Default implementation lists the prefix and deletes keys one by one;
    /// keys removed concurrently in the meantime are skipped.
    async fn delete_all(&self, prefix: &Key) -> Result<()> {
        for key in self.list(prefix).await? {
            match self.delete(&key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Byte length of the value stored at `key`
    async fn size(&self, key: &Key) -> Result<u64>;

    /// Acquire the exclusive lock for `key` within this storage instance
    ///
    /// Locks only exclude other holders of the same instance (or of decorators
    /// delegating to it); separate instances over the same backing data do not
    /// see each other's locks.
    async fn lock(&self, key: &Key) -> KeyGuard;
}
