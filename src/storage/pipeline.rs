//! Locked read-modify-write of a stored value

use super::Storage;
use crate::content::Content;
use crate::error::Result;
use crate::key::Key;
use bytes::Bytes;
use tracing::debug;

/// Read-transform-write cycle over one or two keys of a storage
///
/// The action sees the current value of the read key (`None` when absent) and
/// writes the replacement into a buffer. The result is stored at the write key
/// only if the action succeeds. Locks on both keys are held for the whole cycle,
/// so concurrent pipelines on the same storage instance never lose updates.
///
/// # Examples
///
/// ```
/// use pkgvault::{InMemoryStorage, Key, ValuePipeline};
/// use std::io::Write;
///
/// # async fn example() -> pkgvault::Result<()> {
/// let storage = InMemoryStorage::new();
/// let key = Key::new("counter");
/// ValuePipeline::new(&storage, &key)
///     .process(|current, out| {
///         let n: u64 = current
///             .map(|b| String::from_utf8_lossy(&b).parse().unwrap_or(0))
///             .unwrap_or(0);
///         write!(out, "{}", n + 1).map_err(pkgvault::VaultError::from)
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ValuePipeline<'a> {
    storage: &'a dyn Storage,
    read: Key,
    write: Key,
}

impl<'a> ValuePipeline<'a> {
    /// Pipeline reading and writing the same key
    pub fn new(storage: &'a dyn Storage, key: &Key) -> Self {
        Self::between(storage, key, key)
    }

    /// Pipeline reading one key and writing another
    pub fn between(storage: &'a dyn Storage, read: &Key, write: &Key) -> Self {
        Self {
            storage,
            read: read.clone(),
            write: write.clone(),
        }
    }

    /// Run the action and store its output
    pub async fn process<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(Option<Bytes>, &mut Vec<u8>) -> Result<()> + Send,
    {
        self.process_with_result(action).await
    }

    /// Run the action, store its output and hand back its result
    pub async fn process_with_result<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(Option<Bytes>, &mut Vec<u8>) -> Result<R> + Send,
        R: Send,
    {
        // Ordered acquisition keeps two crossing pipelines from deadlocking
        let (first, second) = if self.read <= self.write {
            (&self.read, &self.write)
        } else {
            (&self.write, &self.read)
        };
        let _first = self.storage.lock(first).await;
        let _second = if first != second {
            Some(self.storage.lock(second).await)
        } else {
            None
        };

        let current = match self.storage.value(&self.read).await {
            Ok(content) => Some(content.into_bytes().await?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let mut output = Vec::new();
        let result = action(current, &mut output)?;
        debug!("Pipeline {} -> {} writing {} bytes", self.read, self.write, output.len());
        self.storage.save(&self.write, Content::from_bytes(output)).await?;
        Ok(result)
    }
}
