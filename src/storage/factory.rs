//! Registry of storage constructors by type name

use super::{FileStorage, InMemoryStorage, LoggingStorage, StorageConfig, StorageHandle, SubStorage};
use crate::error::{Result, VaultError};
use crate::key::Key;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Turns a configuration into a storage instance
///
/// Constructors of decorating storages obtain their inner storage through the
/// resolver so a cache in front of the registry also shares inner instances.
pub type StorageConstructor =
    Arc<dyn Fn(&StorageConfig, &dyn StorageResolver) -> Result<StorageHandle> + Send + Sync>;

/// Anything able to produce a storage for a configuration
pub trait StorageResolver: Send + Sync {
    fn resolve(&self, config: &StorageConfig) -> Result<StorageHandle>;
}

/// Storage constructors keyed by configuration `type`
#[derive(Clone)]
pub struct StorageFactories {
    constructors: HashMap<String, StorageConstructor>,
}

impl StorageFactories {
    /// Registry with no constructors
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in `fs`, `in-memory`, `sub` and `logging` types
    pub fn new() -> Self {
        let mut factories = Self::empty();
        factories.insert("fs", |config, _| {
            let path = config.required("path")?;
            Ok(Arc::new(FileStorage::new(path)?) as StorageHandle)
        });
        factories.insert("in-memory", |_, _| Ok(Arc::new(InMemoryStorage::new()) as StorageHandle));
        factories.insert("sub", |config, resolver| {
            let prefix = Key::new(config.required("prefix")?);
            let inner = config.nested("storage").ok_or_else(|| {
                VaultError::ConfigError("sub storage requires a nested `storage` section".to_string())
            })?;
            Ok(Arc::new(SubStorage::new(prefix, resolver.resolve(&inner)?)) as StorageHandle)
        });
        factories.insert("logging", |config, resolver| {
            let level = match config.param("level") {
                Some(level) => level
                    .parse::<tracing::Level>()
                    .map_err(|e| VaultError::ConfigError(format!("invalid log level `{}`: {}", level, e)))?,
                None => tracing::Level::INFO,
            };
            let inner = config.nested("storage").ok_or_else(|| {
                VaultError::ConfigError("logging storage requires a nested `storage` section".to_string())
            })?;
            Ok(Arc::new(LoggingStorage::with_level(resolver.resolve(&inner)?, level)) as StorageHandle)
        });
        factories
    }

    fn insert<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&StorageConfig, &dyn StorageResolver) -> Result<StorageHandle> + Send + Sync + 'static,
    {
        self.constructors.insert(name.to_string(), Arc::new(constructor));
    }

    /// Add a constructor for a new type name
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is already registered.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(&StorageConfig, &dyn StorageResolver) -> Result<StorageHandle> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.contains_key(&name) {
            return Err(VaultError::ConfigError(format!(
                "storage type `{}` is already registered",
                name
            )));
        }
        info!("Registered storage type {}", name);
        self.constructors.insert(name, Arc::new(constructor));
        Ok(())
    }

    /// Build a storage using `resolver` for nested storages
    pub fn construct_with(&self, config: &StorageConfig, resolver: &dyn StorageResolver) -> Result<StorageHandle> {
        let constructor = self.constructors.get(config.kind()).ok_or_else(|| {
            VaultError::ConfigError(format!("unknown storage type `{}`", config.kind()))
        })?;
        constructor(config, resolver)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StorageFactories {
    fn default() -> Self {
        Self::new()
    }
}

/// Uncached construction: every call builds fresh instances
impl StorageResolver for StorageFactories {
    fn resolve(&self, config: &StorageConfig) -> Result<StorageHandle> {
        self.construct_with(config, self)
    }
}

impl fmt::Debug for StorageFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageFactories").field("types", &self.names()).finish()
    }
}
