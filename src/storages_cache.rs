//! Shared storage instances keyed by configuration
//!
//! Repositories that point at the same storage definition must share one
//! instance, otherwise their per-key locks would not see each other. The cache
//! builds each distinct [`StorageConfig`] exactly once, even when many callers
//! ask for it at the same moment, and hands out the same handle afterwards.

use crate::error::{Result, VaultError};
use crate::metrics::VaultMetrics;
use crate::storage::{StorageConfig, StorageFactories, StorageHandle, StorageResolver};
use serde_yaml::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

type Slot = Arc<Mutex<Option<StorageHandle>>>;

/// Memoizing front of a [`StorageFactories`] registry
pub struct StoragesCache {
    factories: StorageFactories,
    slots: Mutex<HashMap<StorageConfig, Slot>>,
    metrics: Option<Arc<VaultMetrics>>,
}

impl StoragesCache {
    pub fn new(factories: StorageFactories) -> Self {
        Self {
            factories,
            slots: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<VaultMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The storage for `config`, constructing it on first request
    ///
    /// Concurrent first requests for the same configuration wait for a single
    /// construction. A failed construction is not remembered; the next request
    /// tries again.
    pub fn storage(&self, config: &StorageConfig) -> Result<StorageHandle> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(config.clone()).or_default().clone()
        };
        // Only callers of this configuration wait here; nested storages use other slots.
        // Constructors do no I/O, so holding the slot never blocks an async worker on disk.
        let mut instance = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(storage) = instance.as_ref() {
            return Ok(storage.clone());
        }
        let storage = self.factories.construct_with(config, self)?;
        info!(
            "Constructed storage {} for {} ({:016x})",
            storage.identifier(),
            config,
            config.fingerprint()
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_storage_constructed();
        }
        *instance = Some(storage.clone());
        Ok(storage)
    }

    /// The storage named by the `storage` entry of a repository section
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the section has no `storage` entry.
    pub fn from_section(&self, section: Option<&Value>, aliases: &HashMap<String, Value>) -> Result<StorageHandle> {
        let value = section.ok_or_else(|| VaultError::ConfigError("storage section is missing".to_string()))?;
        let config = StorageConfig::resolve(value, aliases)?;
        self.storage(&config)
    }

    /// Number of live storage instances
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots
            .iter()
            .filter(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every instance; handles already given out stay usable
    pub fn invalidate_all(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Invalidating {} cached storages", slots.len());
        slots.clear();
    }
}

impl StorageResolver for StoragesCache {
    fn resolve(&self, config: &StorageConfig) -> Result<StorageHandle> {
        self.storage(config)
    }
}

impl Default for StoragesCache {
    fn default() -> Self {
        Self::new(StorageFactories::new())
    }
}
