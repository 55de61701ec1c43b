//! Storage-backed cache in front of remote origins
//!
//! A proxy repository asks its [`Cache`] for a key, passing the [`Remote`] to
//! fetch from on a miss. [`ProxyCache`] keeps fetched bodies in a storage and
//! tracks them in an in-memory index with insertion time and size, which drives
//! expiry (TTL) and eviction (total size budget, oldest insertion first).
//!
//! Origin bodies stream straight into the storage. Storages commit a value
//! only once its content has been fully written, so a broken fetch leaves no
//! cache entry. Remotes sharing one storage share one [`ProxyCache`] through
//! [`ProxyCaches`], so the size budget covers everything kept there.

use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::key::Key;
use crate::metrics::VaultMetrics;
use crate::storage::{StorageConfig, StorageHandle};
use crate::storages_cache::StoragesCache;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Source of artifacts for a cache miss
#[async_trait]
pub trait Remote: Send + Sync {
    async fn fetch(&self, key: &Key) -> Result<Content>;
}

/// Artifact lookup with an origin fallback
#[async_trait]
pub trait Cache: Send + Sync {
    async fn load(&self, key: &Key, remote: &dyn Remote) -> Result<Content>;
}

/// Cache that never stores anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NopCache;

#[async_trait]
impl Cache for NopCache {
    async fn load(&self, key: &Key, remote: &dyn Remote) -> Result<Content> {
        remote.fetch(key).await
    }
}

/// Expiry and size limits of a [`ProxyCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSettings {
    /// Upper bound on the summed size of cached bodies; unbounded when `None`
    pub max_size: Option<u64>,
    /// Age after which an entry is refetched; never expires when `None`
    pub ttl: Option<Duration>,
}

/// Counters describing a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    stored_at: Instant,
    size: u64,
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<Key, IndexEntry>,
    /// Insertion sequence to key; smallest is the oldest entry
    order: BTreeMap<u64, Key>,
    total: u64,
    next_seq: u64,
}

impl CacheIndex {
    fn remove(&mut self, key: &Key) -> Option<IndexEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        self.total -= entry.size;
        Some(entry)
    }

    /// Record `key` and return the keys evicted to respect `max_size`
    fn admit(&mut self, key: &Key, size: u64, now: Instant, max_size: Option<u64>) -> Vec<Key> {
        self.remove(key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.clone(),
            IndexEntry {
                stored_at: now,
                size,
                seq,
            },
        );
        self.order.insert(seq, key.clone());
        self.total += size;

        let mut evicted = Vec::new();
        let Some(max_size) = max_size else {
            return evicted;
        };
        while self.total > max_size {
            // The entry just admitted stays even when it alone exceeds the budget
            let victim = self.order.values().find(|candidate| *candidate != key).cloned();
            match victim {
                Some(victim) => {
                    self.remove(&victim);
                    evicted.push(victim);
                }
                None => break,
            }
        }
        evicted
    }
}

/// Storage-backed cache with TTL expiry and a total size budget
pub struct ProxyCache {
    storage: StorageHandle,
    settings: CacheSettings,
    index: Mutex<CacheIndex>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    metrics: Option<Arc<VaultMetrics>>,
}

enum Lookup {
    Hit(Content),
    Miss,
    Expired,
}

impl ProxyCache {
    pub fn new(storage: StorageHandle, settings: CacheSettings) -> Self {
        info!(
            "Proxy cache over {} (max_size={:?}, ttl={:?})",
            storage.identifier(),
            settings.max_size,
            settings.ttl
        );
        Self {
            storage,
            settings,
            index: Mutex::new(CacheIndex::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: index.entries.len(),
            total_bytes: index.total,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Summed size of the indexed bodies
    pub fn total_size(&self) -> u64 {
        self.index.lock().unwrap_or_else(PoisonError::into_inner).total
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(key)
    }

    fn is_fresh(&self, entry: &IndexEntry, now: Instant) -> bool {
        match self.settings.ttl {
            Some(ttl) => now.duration_since(entry.stored_at) < ttl,
            None => true,
        }
    }

    async fn lookup(&self, key: &Key) -> Result<Lookup> {
        let now = Instant::now();
        let indexed = {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            match index.entries.get(key).copied() {
                Some(entry) if self.is_fresh(&entry, now) => true,
                Some(_) => return Ok(Lookup::Expired),
                None => false,
            }
        };

        if !indexed && self.settings.ttl.is_some() {
            // Age of an unindexed body is unknown, so it cannot be trusted
            return Ok(Lookup::Miss);
        }
        match self.storage.value(key).await {
            Ok(content) => {
                if !indexed {
                    let size = match content.size() {
                        Some(size) => size,
                        None => self.storage.size(key).await?,
                    };
                    debug!("Adopting stored body {} ({} bytes)", key, size);
                    let evicted = self.admit(key, size);
                    self.purge(evicted).await;
                }
                Ok(Lookup::Hit(content))
            }
            Err(e) if e.is_not_found() => {
                if indexed {
                    warn!("Cache entry {} lost its stored body", key);
                    self.index.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
                }
                Ok(Lookup::Miss)
            }
            Err(e) => Err(e),
        }
    }

    fn admit(&self, key: &Key, size: u64) -> Vec<Key> {
        let evicted = self
            .index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admit(key, size, Instant::now(), self.settings.max_size);
        if !evicted.is_empty() {
            self.evictions.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_evictions(evicted.len() as u64);
            }
        }
        evicted
    }

    /// Drop an expired entry together with its body
    ///
    /// Callers hold the key's storage lock, so no fresh body can be racing in.
    async fn discard(&self, key: &Key) {
        debug!("Cache entry {} expired", key);
        self.index.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        match self.storage.delete(key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Failed to delete expired entry {}: {}", key, e),
        }
    }

    async fn purge(&self, evicted: Vec<Key>) {
        for key in evicted {
            debug!("Evicting {} from cache", key);
            match self.storage.delete(&key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Failed to delete evicted entry {}: {}", key, e),
            }
        }
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_hit();
        }
    }
}

#[async_trait]
impl Cache for ProxyCache {
    async fn load(&self, key: &Key, remote: &dyn Remote) -> Result<Content> {
        if key.is_root() {
            return Err(VaultError::InvalidKey("cannot cache the root key".to_string()));
        }
        if let Lookup::Hit(content) = self.lookup(key).await? {
            self.hit();
            return Ok(content);
        }

        // One origin fetch per key at a time; waiters find the fresh entry
        let _guard = self.storage.lock(key).await;
        match self.lookup(key).await? {
            Lookup::Hit(content) => {
                self.hit();
                return Ok(content);
            }
            Lookup::Expired => self.discard(key).await,
            Lookup::Miss => {}
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss();
        }
        let fetched = remote.fetch(key).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_origin_fetch(&fetched);
        }
        self.storage.save(key, fetched?).await?;

        // Open the body before admitting it so a concurrent eviction cannot pull it away
        let content = self.storage.value(key).await?;
        let size = match content.size() {
            Some(size) => size,
            None => self.storage.size(key).await?,
        };
        let evicted = self.admit(key, size);
        self.purge(evicted).await;
        debug!("Cached {} ({} bytes)", key, size);
        Ok(content)
    }
}

/// One [`ProxyCache`] per cache storage configuration
///
/// Remotes caching into the same storage get the same cache, so a single
/// index enforces the size budget and evictions never delete a body another
/// index still counts. The first settings requested for a storage win.
#[derive(Default)]
pub struct ProxyCaches {
    caches: Mutex<HashMap<StorageConfig, Arc<ProxyCache>>>,
    metrics: Option<Arc<VaultMetrics>>,
}

impl ProxyCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The cache over `storage`, built from `storages` on first request
    pub fn cache(&self, storage: &StorageConfig, settings: CacheSettings, storages: &StoragesCache) -> Result<Arc<ProxyCache>> {
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = caches.get(storage) {
            if cache.settings() != settings {
                warn!(
                    "Cache over {} already configured with {:?}, ignoring {:?}",
                    storage,
                    cache.settings(),
                    settings
                );
            }
            return Ok(cache.clone());
        }
        let mut cache = ProxyCache::new(storages.storage(storage)?, settings);
        if let Some(metrics) = &self.metrics {
            cache = cache.with_metrics(metrics.clone());
        }
        let cache = Arc::new(cache);
        caches.insert(storage.clone(), cache.clone());
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn test_index_evicts_oldest_first() {
        let mut index = CacheIndex::default();
        assert!(index.admit(&Key::new("a"), 4, now(), Some(10)).is_empty());
        assert!(index.admit(&Key::new("b"), 4, now(), Some(10)).is_empty());
        let evicted = index.admit(&Key::new("c"), 4, now(), Some(10));
        assert_eq!(evicted, vec![Key::new("a")]);
        assert_eq!(index.total, 8);
    }

    #[test]
    fn test_index_keeps_oversized_newcomer() {
        let mut index = CacheIndex::default();
        index.admit(&Key::new("a"), 4, now(), Some(10));
        let evicted = index.admit(&Key::new("big"), 20, now(), Some(10));
        assert_eq!(evicted, vec![Key::new("a")]);
        assert!(index.entries.contains_key(&Key::new("big")));
        let evicted = index.admit(&Key::new("small"), 1, now(), Some(10));
        assert_eq!(evicted, vec![Key::new("big")]);
        assert_eq!(index.total, 1);
    }

    #[tokio::test]
    async fn test_remotes_share_cache_per_storage() {
        let storages = StoragesCache::default();
        let caches = ProxyCaches::new();
        let shared = StorageConfig::in_memory("proxy");
        let settings = CacheSettings {
            max_size: Some(6),
            ttl: None,
        };
        let a = caches.cache(&shared, settings, &storages).unwrap();
        let b = caches.cache(&shared, CacheSettings::default(), &storages).unwrap();
        let other = caches.cache(&StorageConfig::in_memory("elsewhere"), settings, &storages).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(b.settings(), settings);
        assert_eq!(caches.len(), 2);
    }

    #[test]
    fn test_index_readmit_replaces_size() {
        let mut index = CacheIndex::default();
        index.admit(&Key::new("a"), 4, now(), None);
        index.admit(&Key::new("a"), 6, now(), None);
        assert_eq!(index.total, 6);
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.order.len(), 1);
    }
}
