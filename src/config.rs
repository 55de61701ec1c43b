//! Configuration management for pkgvault
//!
//! The vault is configured from a single YAML document:
//!
//! ```yaml
//! server:
//!   address: "0.0.0.0:8080"
//! metrics:
//!   enabled: true
//!   path: /metrics
//! storages:
//!   default:
//!     type: fs
//!     path: /var/lib/pkgvault
//! credentials:
//!   alice: secret
//! metadata:
//!   interval_secs: 10
//!   batch_size: 1000
//!   capacity: 10000
//! repositories:
//!   local:
//!     type: file
//!     storage: default
//!   central:
//!     type: file-proxy
//!     remotes:
//!       - url: https://repo1.maven.org/maven2
//!         cache:
//!           storage: default
//!           max_size: 1073741824
//!           ttl_secs: 86400
//!   all:
//!     type: group
//!     members: [local, central]
//! ```
//!
//! Only the server and metrics sections are validated at load time. Each
//! repository section is checked when the repository is first built, so one
//! broken repository does not take the others down.

use crate::auth::{Anonymous, Authentication, BasicAuthentication};
use crate::error::{Result, VaultError};
use crate::proxy_cache::CacheSettings;
use crate::remote::{RemoteCache, RemoteEndpoint};
use crate::storage::StorageConfig;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Top-level vault configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Named storage definitions that repositories refer to by alias
    #[serde(default)]
    pub storages: HashMap<String, Value>,

    /// User name to password; empty means anonymous access
    #[serde(default)]
    pub credentials: HashMap<String, String>,

    #[serde(default)]
    pub repositories: BTreeMap<String, RepoConfig>,

    /// Artifact event collection; repositories report no events when absent
    #[serde(default)]
    pub metadata: Option<MetadataConfig>,
}

/// Artifact event queues and their consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Seconds between consumer runs (default: 10)
    #[serde(default = "default_metadata_interval")]
    pub interval_secs: u64,

    /// Events taken from each queue per run (default: 1000)
    #[serde(default = "default_metadata_batch")]
    pub batch_size: usize,

    /// Events a queue holds before dropping the oldest (default: 10000)
    #[serde(default = "default_metadata_capacity")]
    pub capacity: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metadata_interval(),
            batch_size: default_metadata_batch(),
            capacity: default_metadata_capacity(),
        }
    }
}

impl MetadataConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080)
    #[serde(default = "default_address")]
    pub address: String,

    /// Deadline for any request; repositories may set a shorter one
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            request_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to expose metrics (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path serving the Prometheus text format (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

/// One repository section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// `file`, `file-proxy` or `group`
    #[serde(rename = "type")]
    pub kind: String,

    /// Storage alias name or inline storage definition
    #[serde(default)]
    pub storage: Option<Value>,

    /// Origins of a proxy repository, in fallback order
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,

    /// Member repository names of a group, in fallback order
    #[serde(default)]
    pub members: Vec<String>,

    /// Deadline for producing a response
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl RepoConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub cache: Option<RemoteCacheConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheConfig {
    /// Storage alias name or inline storage definition
    pub storage: Value,

    /// Total size budget in bytes; unbounded when absent
    #[serde(default)]
    pub max_size: Option<u64>,

    /// Entry lifetime in seconds; entries never expire when absent
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl RemoteConfig {
    /// Resolve into an endpoint, looking up storage aliases in `aliases`
    pub fn endpoint(&self, aliases: &HashMap<String, Value>) -> Result<RemoteEndpoint> {
        let mut endpoint = RemoteEndpoint::new(&self.url)?;
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                endpoint = endpoint.with_credentials(username.clone(), password.clone());
            }
            (None, None) => {}
            _ => {
                return Err(VaultError::ConfigError(format!(
                    "remote {} needs both username and password",
                    self.url
                )))
            }
        }
        if let Some(cache) = &self.cache {
            if cache.max_size == Some(0) {
                return Err(VaultError::ConfigError(format!(
                    "remote {} cache max_size must be > 0",
                    self.url
                )));
            }
            endpoint = endpoint.with_cache(RemoteCache {
                storage: StorageConfig::resolve(&cache.storage, aliases)?,
                settings: CacheSettings {
                    max_size: cache.max_size,
                    ttl: cache.ttl_secs.map(Duration::from_secs),
                },
            });
        }
        Ok(endpoint)
    }
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_metadata_interval() -> u64 {
    10
}

fn default_metadata_batch() -> usize {
    1000
}

fn default_metadata_capacity() -> usize {
    crate::events::DEFAULT_QUEUE_CAPACITY
}

impl VaultConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(VaultConfig)` if loading and validation succeed
    /// * `Err(VaultError)` if the file cannot be read or the config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| VaultError::ConfigError(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate configuration text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: VaultConfig = serde_yaml::from_str(content)
            .map_err(|e| VaultError::ConfigError(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the vault-wide sections
    ///
    /// # Validation Rules
    /// - server address must be a socket address
    /// - request timeout, if set, must be positive
    /// - metrics path must start with `/`
    /// - repository names must be non-empty and free of `/`
    /// - metadata interval, batch size and capacity, if configured, must be positive
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.server.request_timeout_secs == Some(0) {
            return Err(VaultError::ConfigError("request_timeout_secs must be > 0".to_string()));
        }
        if !self.metrics.path.starts_with('/') {
            return Err(VaultError::ConfigError(format!(
                "metrics path must start with '/', got {}",
                self.metrics.path
            )));
        }
        for name in self.repositories.keys() {
            if name.is_empty() || name.contains('/') {
                return Err(VaultError::ConfigError(format!("invalid repository name `{}`", name)));
            }
        }
        if let Some(metadata) = &self.metadata {
            if metadata.interval_secs == 0 || metadata.batch_size == 0 || metadata.capacity == 0 {
                return Err(VaultError::ConfigError(
                    "metadata interval_secs, batch_size and capacity must be > 0".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.server.address.parse().map_err(|e| {
            VaultError::ConfigError(format!("invalid server address {}: {}", self.server.address, e))
        })
    }

    /// Request authentication implied by the credentials section
    pub fn authentication(&self) -> Arc<dyn Authentication> {
        if self.credentials.is_empty() {
            Arc::new(Anonymous)
        } else {
            Arc::new(BasicAuthentication::new(self.credentials.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
storages:
  default:
    type: fs
    path: /tmp/pkgvault
repositories:
  local:
    type: file
    storage: default
  central:
    type: file-proxy
    remotes:
      - url: https://repo.example.com/maven2
        username: bot
        password: pw
        cache:
          storage: default
          max_size: 1024
          ttl_secs: 60
  all:
    type: group
    members: [local, central]
"#;

    #[test]
    fn test_defaults() {
        let config = VaultConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.server.address, "0.0.0.0:8080");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.path, "/metrics");
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_sample_parses() {
        let config = VaultConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.repositories.len(), 3);
        assert_eq!(config.repositories["all"].members, vec!["local", "central"]);

        let endpoint = config.repositories["central"].remotes[0].endpoint(&config.storages).unwrap();
        assert_eq!(endpoint.credentials.as_ref().unwrap().username, "bot");
        let cache = endpoint.cache.unwrap();
        assert_eq!(cache.storage, StorageConfig::fs("/tmp/pkgvault"));
        assert_eq!(cache.settings.max_size, Some(1024));
        assert_eq!(cache.settings.ttl, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_server_address() {
        let err = VaultConfig::from_yaml_str("server:\n  address: nowhere").unwrap_err();
        assert!(matches!(err, VaultError::ConfigError(_)));
    }

    #[test]
    fn test_invalid_metrics_path() {
        assert!(VaultConfig::from_yaml_str("metrics:\n  path: metrics").is_err());
    }

    #[test]
    fn test_metadata_section() {
        assert!(VaultConfig::from_yaml_str("{}").unwrap().metadata.is_none());

        let config = VaultConfig::from_yaml_str("metadata: {}").unwrap();
        let metadata = config.metadata.unwrap();
        assert_eq!(metadata.interval(), Duration::from_secs(10));
        assert_eq!(metadata.batch_size, 1000);

        assert!(VaultConfig::from_yaml_str("metadata:\n  capacity: 0").is_err());
    }

    #[test]
    fn test_half_credentials_rejected() {
        let remote = RemoteConfig {
            url: "https://x.example.com".to_string(),
            username: Some("bot".to_string()),
            password: None,
            cache: None,
        };
        assert!(matches!(remote.endpoint(&HashMap::new()), Err(VaultError::ConfigError(_))));
    }

    #[test]
    fn test_unknown_repo_type_is_not_a_load_error() {
        let config = VaultConfig::from_yaml_str("repositories:\n  odd:\n    type: docker\n").unwrap();
        assert_eq!(config.repositories["odd"].kind, "docker");
    }
}
