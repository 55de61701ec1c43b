//! Normalized storage configuration
//!
//! Storage sections arrive as YAML in several shapes: inline mappings, nested
//! mappings for decorated storages, or a bare alias name pointing at a shared
//! definition in the top-level `storages` section. [`StorageConfig`] flattens all
//! of them into one canonical value so equal configurations compare and hash
//! equal no matter how they were written.

use crate::error::{Result, VaultError};
use crate::key::Key;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Canonical storage definition: a backend kind plus flat parameters
///
/// Nested sections are flattened with dotted names, so a sub-storage over a
/// filesystem storage is `sub{prefix=repo, storage.path=/data, storage.type=fs}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageConfig {
    kind: String,
    params: BTreeMap<String, String>,
}

impl StorageConfig {
    pub fn new(kind: impl AsRef<str>) -> Self {
        Self {
            kind: normalize_kind(kind.as_ref()),
            params: BTreeMap::new(),
        }
    }

    /// Filesystem storage rooted at `path`
    pub fn fs(path: impl AsRef<str>) -> Self {
        Self::new("fs").with_param("path", path)
    }

    /// Named in-memory storage; equal names resolve to the same instance when cached
    pub fn in_memory(name: impl AsRef<str>) -> Self {
        Self::new("in-memory").with_param("name", name)
    }

    /// View of `inner` under `prefix`
    pub fn sub(prefix: &Key, inner: &StorageConfig) -> Self {
        let mut config = Self::new("sub").with_param("prefix", prefix.string());
        config.params.insert("storage.type".to_string(), inner.kind.clone());
        for (name, value) in &inner.params {
            config.params.insert(format!("storage.{}", name), value.clone());
        }
        config
    }

    pub fn with_param(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim().to_string();
        let value = normalize_value(&name, value.as_ref());
        self.params.insert(name, value);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Parameter that must be present
    pub fn required(&self, name: &str) -> Result<&str> {
        self.param(name).ok_or_else(|| {
            VaultError::ConfigError(format!("storage `{}` requires parameter `{}`", self.kind, name))
        })
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// The configuration nested under `section`, if any
    pub fn nested(&self, section: &str) -> Option<StorageConfig> {
        let prefix = format!("{}.", section);
        let kind = self.params.get(&format!("{}type", prefix))?;
        let params = self
            .params
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(&prefix)
                    .filter(|rest| *rest != "type")
                    .map(|rest| (rest.to_string(), value.clone()))
            })
            .collect();
        Some(Self {
            kind: kind.clone(),
            params,
        })
    }

    /// Parse an inline YAML mapping with a `type` entry
    pub fn from_yaml(value: &Value) -> Result<Self> {
        Self::resolve(value, &HashMap::new())
    }

    /// Parse a YAML storage section, resolving alias names through `aliases`
    ///
    /// A scalar string names an entry of `aliases`; a mapping is an inline
    /// definition whose nested `storage` sections may themselves be aliases.
    pub fn resolve(value: &Value, aliases: &HashMap<String, Value>) -> Result<Self> {
        Self::resolve_depth(value, aliases, 0)
    }

    fn resolve_depth(value: &Value, aliases: &HashMap<String, Value>, depth: usize) -> Result<Self> {
        if depth > 8 {
            return Err(VaultError::ConfigError("storage aliases nest too deeply".to_string()));
        }
        match value {
            Value::String(alias) => {
                let target = aliases.get(alias.trim()).ok_or_else(|| {
                    VaultError::ConfigError(format!("unknown storage alias `{}`", alias))
                })?;
                Self::resolve_depth(target, aliases, depth + 1)
            }
            Value::Mapping(mapping) => {
                let kind = mapping
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| VaultError::ConfigError("storage section has no `type`".to_string()))?;
                let mut config = Self::new(kind);
                for (name, entry) in mapping {
                    let name = name
                        .as_str()
                        .ok_or_else(|| VaultError::ConfigError("storage keys must be strings".to_string()))?;
                    if name == "type" {
                        continue;
                    }
                    if matches!(entry, Value::Mapping(_)) || name == "storage" {
                        let inner = Self::resolve_depth(entry, aliases, depth + 1)?;
                        config.params.insert(format!("{}.type", name), inner.kind);
                        for (inner_name, inner_value) in inner.params {
                            config.params.insert(format!("{}.{}", name, inner_name), inner_value);
                        }
                    } else {
                        config = config.with_param(name, scalar(name, entry)?);
                    }
                }
                Ok(config)
            }
            other => Err(VaultError::ConfigError(format!(
                "storage section must be a mapping or alias name, got {:?}",
                other
            ))),
        }
    }

    /// Stable 64-bit digest of the canonical form
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(self.to_string().as_bytes())
    }
}

impl fmt::Display for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.kind)?;
        for (index, (name, value)) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        f.write_str("}")
    }
}

fn normalize_kind(kind: &str) -> String {
    let kind = kind.trim().to_ascii_lowercase();
    match kind.as_str() {
        "file" | "filesystem" => "fs".to_string(),
        "memory" | "inmemory" | "in_memory" => "in-memory".to_string(),
        _ => kind,
    }
}

fn normalize_value(name: &str, value: &str) -> String {
    let value = value.trim();
    if name == "path" || name.ends_with(".path") {
        normalize_path(value)
    } else {
        value.to_string()
    }
}

/// Collapse repeated and trailing separators and `.` segments
fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn scalar(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(VaultError::ConfigError(format!(
            "storage parameter `{}` must be a scalar",
            name
        ))),
    }
}
