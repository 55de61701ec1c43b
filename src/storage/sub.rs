//! Prefixed view over another storage

use super::{KeyGuard, Storage, StorageHandle};
use crate::content::Content;
use crate::error::Result;
use crate::key::Key;
use async_trait::async_trait;

/// Storage exposing the keys of `origin` under `prefix`, with the prefix removed
///
/// Lets several repositories share one backend without seeing each other's
/// values. Locks are taken on the origin, so two views over the same origin
/// instance exclude each other on overlapping keys.
pub struct SubStorage {
    prefix: Key,
    origin: StorageHandle,
}

impl SubStorage {
    pub fn new(prefix: Key, origin: StorageHandle) -> Self {
        Self { prefix, origin }
    }

    fn full(&self, key: &Key) -> Key {
        self.prefix.concat(key)
    }
}

#[async_trait]
impl Storage for SubStorage {
    fn identifier(&self) -> String {
        format!("sub:{}:{}", self.prefix, self.origin.identifier())
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        self.origin.exists(&self.full(key)).await
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let keys = self.origin.list(&self.full(prefix)).await?;
        Ok(keys.iter().filter_map(|key| key.strip_prefix(&self.prefix)).collect())
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        self.origin.save(&self.full(key), content).await
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        self.origin.value(&self.full(key)).await
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        self.origin.move_to(&self.full(source), &self.full(destination)).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.origin.delete(&self.full(key)).await
    }

    async fn delete_all(&self, prefix: &Key) -> Result<()> {
        self.origin.delete_all(&self.full(prefix)).await
    }

    async fn size(&self, key: &Key) -> Result<u64> {
        self.origin.size(&self.full(key)).await
    }

    async fn lock(&self, key: &Key) -> KeyGuard {
        self.origin.lock(&self.full(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_views_are_isolated() {
        let origin: StorageHandle = Arc::new(InMemoryStorage::new());
        let first = SubStorage::new(Key::new("repo-a"), origin.clone());
        let second = SubStorage::new(Key::new("repo-b"), origin.clone());

        first.save(&Key::new("x/1"), Content::from_bytes("a")).await.unwrap();
        second.save(&Key::new("x/2"), Content::from_bytes("b")).await.unwrap();

        assert_eq!(first.list(&Key::ROOT).await.unwrap(), vec![Key::new("x/1")]);
        assert!(!second.exists(&Key::new("x/1")).await.unwrap());
        assert!(origin.exists(&Key::new("repo-a/x/1")).await.unwrap());

        first.delete_all(&Key::ROOT).await.unwrap();
        assert_eq!(origin.list(&Key::ROOT).await.unwrap(), vec![Key::new("repo-b/x/2")]);
    }
}
