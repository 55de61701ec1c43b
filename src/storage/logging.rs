//! Storage decorator that logs every operation

use super::{KeyGuard, Storage, StorageHandle};
use crate::content::Content;
use crate::error::Result;
use crate::key::Key;
use async_trait::async_trait;
use tracing::Level;

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        if $level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if $level == Level::WARN {
            tracing::warn!($($arg)+)
        } else if $level == Level::INFO {
            tracing::info!($($arg)+)
        } else if $level == Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// Wraps a storage and logs each call with its outcome at a fixed level
pub struct LoggingStorage {
    origin: StorageHandle,
    level: Level,
}

impl LoggingStorage {
    pub fn new(origin: StorageHandle) -> Self {
        Self::with_level(origin, Level::INFO)
    }

    pub fn with_level(origin: StorageHandle, level: Level) -> Self {
        Self { origin, level }
    }

    fn outcome<T: std::fmt::Debug>(&self, op: &str, detail: String, result: &Result<T>) {
        match result {
            Ok(value) => log_at!(self.level, "{} {}: {}: {:?}", self.origin.identifier(), op, detail, value),
            Err(e) => log_at!(self.level, "{} {}: {}: failed: {}", self.origin.identifier(), op, detail, e),
        }
    }
}

#[async_trait]
impl Storage for LoggingStorage {
    fn identifier(&self) -> String {
        self.origin.identifier()
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        let result = self.origin.exists(key).await;
        self.outcome("exists", key.to_string(), &result);
        result
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let result = self.origin.list(prefix).await;
        let count = result.as_ref().map(Vec::len).map_err(Clone::clone);
        self.outcome("list", prefix.to_string(), &count);
        result
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        let result = self.origin.save(key, content).await;
        self.outcome("save", key.to_string(), &result);
        result
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        let result = self.origin.value(key).await;
        let size = result.as_ref().map(Content::size).map_err(Clone::clone);
        self.outcome("value", key.to_string(), &size);
        result
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        let result = self.origin.move_to(source, destination).await;
        self.outcome("move", format!("{} -> {}", source, destination), &result);
        result
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let result = self.origin.delete(key).await;
        self.outcome("delete", key.to_string(), &result);
        result
    }

    async fn delete_all(&self, prefix: &Key) -> Result<()> {
        let result = self.origin.delete_all(prefix).await;
        self.outcome("delete_all", prefix.to_string(), &result);
        result
    }

    async fn size(&self, key: &Key) -> Result<u64> {
        let result = self.origin.size(key).await;
        self.outcome("size", key.to_string(), &result);
        result
    }

    async fn lock(&self, key: &Key) -> KeyGuard {
        log_at!(self.level, "{} lock: {}", self.origin.identifier(), key);
        self.origin.lock(key).await
    }
}
