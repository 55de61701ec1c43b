use pkgvault::config::VaultConfig;
use pkgvault::storage::StorageConfig;
use pkgvault::{Key, VaultError};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_load_sample_config() {
    let config = VaultConfig::from_file("pkgvault.yaml");
    assert!(config.is_ok(), "Failed to load sample config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.server.address, "0.0.0.0:8080");
    assert_eq!(config.server.request_timeout(), Some(Duration::from_secs(300)));
    assert!(config.metrics.enabled);
    assert_eq!(config.repositories.len(), 3);
    assert_eq!(config.repositories["central"].timeout(), Some(Duration::from_secs(120)));
    let metadata = config.metadata.as_ref().unwrap();
    assert_eq!(metadata.interval(), Duration::from_secs(10));
    assert_eq!(metadata.capacity, 10_000);

    let endpoint = config.repositories["central"].remotes[0]
        .endpoint(&config.storages)
        .unwrap();
    let cache = endpoint.cache.unwrap();
    assert_eq!(
        cache.storage,
        StorageConfig::sub(&Key::new(".cache"), &StorageConfig::fs("/var/lib/pkgvault"))
    );
    assert_eq!(cache.settings.ttl, Some(Duration::from_secs(86400)));
}

#[test]
fn test_load_minimal_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "repositories:\n  local:\n    type: file\n    storage:\n      type: in-memory").unwrap();

    let config = VaultConfig::from_file(file.path()).unwrap();
    // Defaults are applied
    assert_eq!(config.server.address, "0.0.0.0:8080");
    assert_eq!(config.metrics.path, "/metrics");
    assert!(config.credentials.is_empty());
    assert_eq!(config.repositories["local"].kind, "file");
}

#[test]
fn test_load_invalid_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "server:\n  request_timeout_secs: 0").unwrap();
    let err = VaultConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, VaultError::ConfigError(_)));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "repositories:\n  \"a/b\":\n    type: file").unwrap();
    assert!(VaultConfig::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file() {
    let err = VaultConfig::from_file("/nonexistent/pkgvault.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_malformed_yaml() {
    let err = VaultConfig::from_yaml_str("repositories: [unclosed").unwrap_err();
    assert!(matches!(err, VaultError::ConfigError(_)));
}
