//! In-memory storage backend

use super::{KeyGuard, KeyLocks, Storage};
use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::key::Key;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Storage keeping every value in an ordered in-process map
///
/// Values are materialized on save, so a failing content stream leaves the
/// previous value untouched.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: RwLock<BTreeMap<Key, Bytes>>,
    locks: KeyLocks,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &Key) -> Result<Bytes> {
        if key.is_root() {
            return Err(VaultError::InvalidKey("unable to load from root".to_string()));
        }
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| VaultError::not_found(key))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn identifier(&self) -> String {
        "in-memory".to_string()
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        Ok(self.data.read().unwrap_or_else(PoisonError::into_inner).contains_key(key))
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        // Keys sharing a segment prefix are contiguous in segment order
        Ok(data
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        if key.is_root() {
            return Err(VaultError::InvalidKey("unable to save to root".to_string()));
        }
        let bytes = content.into_bytes().await?;
        debug!("Saving {} bytes at {}", bytes.len(), key);
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), bytes);
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        self.get(key).map(Content::from_bytes)
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        if destination.is_root() {
            return Err(VaultError::InvalidKey("unable to move to root".to_string()));
        }
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let value = data.remove(source).ok_or_else(|| VaultError::not_found(source))?;
        data.insert(destination.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| VaultError::not_found(key))
    }

    async fn delete_all(&self, prefix: &Key) -> Result<()> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn size(&self, key: &Key) -> Result<u64> {
        self.get(key).map(|bytes| bytes.len() as u64)
    }

    async fn lock(&self, key: &Key) -> KeyGuard {
        self.locks.acquire(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_save_and_read() {
        let storage = InMemoryStorage::new();
        let key = Key::new("a/b");
        storage.save(&key, Content::from_bytes("value")).await.unwrap();
        let bytes = storage.value(&key).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(bytes, Bytes::from("value"));
        assert_eq!(storage.size(&key).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_missing_value_is_not_found() {
        let storage = InMemoryStorage::new();
        assert!(storage.value(&Key::new("nope")).await.unwrap_err().is_not_found());
        assert!(storage.size(&Key::new("nope")).await.unwrap_err().is_not_found());
        assert!(storage.delete(&Key::new("nope")).await.unwrap_err().is_not_found());
        assert!(!storage.exists(&Key::new("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_root_rejected() {
        let storage = InMemoryStorage::new();
        let err = storage.save(&Key::ROOT, Content::empty()).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_list_is_segment_prefix() {
        let storage = InMemoryStorage::new();
        for key in ["a/b/1", "a/b/2", "a/bc/3", "a", "b/1"] {
            storage.save(&Key::new(key), Content::from_bytes("x")).await.unwrap();
        }
        let listed = storage.list(&Key::new("a/b")).await.unwrap();
        assert_eq!(listed, vec![Key::new("a/b/1"), Key::new("a/b/2")]);
        assert_eq!(storage.list(&Key::ROOT).await.unwrap().len(), 5);
        assert!(storage.list(&Key::new("zzz")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_stream_keeps_previous_value() {
        let storage = InMemoryStorage::new();
        let key = Key::new("a");
        storage.save(&key, Content::from_bytes("old")).await.unwrap();
        let broken = Content::from_stream(
            stream::iter(vec![Ok(Bytes::from("ne")), Err(VaultError::IoError("reset".into()))]),
            None,
        );
        assert!(storage.save(&key, broken).await.is_err());
        let bytes = storage.value(&key).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(bytes, Bytes::from("old"));
    }

    #[tokio::test]
    async fn test_move_and_delete_all() {
        let storage = InMemoryStorage::new();
        storage.save(&Key::new("x/1"), Content::from_bytes("1")).await.unwrap();
        storage.save(&Key::new("x/2"), Content::from_bytes("2")).await.unwrap();
        storage.move_to(&Key::new("x/1"), &Key::new("y/1")).await.unwrap();
        assert!(!storage.exists(&Key::new("x/1")).await.unwrap());
        assert!(storage.exists(&Key::new("y/1")).await.unwrap());

        storage.delete_all(&Key::new("x")).await.unwrap();
        assert_eq!(storage.list(&Key::ROOT).await.unwrap(), vec![Key::new("y/1")]);
    }
}
