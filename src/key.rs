//! Hierarchical storage keys
//!
//! A [`Key`] is an ordered list of non-empty segments such as `org/lib/1.0/lib.jar`.
//! Keys are plain values: two keys are equal when their segments are equal, so they
//! work as storage addresses and as map keys alike.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Segment delimiter used when parsing and printing keys
pub const DELIMITER: char = '/';

/// Hierarchical address of a stored value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    parts: Vec<String>,
}

impl Key {
    /// The root key (zero segments)
    pub const ROOT: Key = Key { parts: Vec::new() };

    /// Parse a key from a `/`-delimited string
    ///
    /// Empty segments (leading, trailing or doubled slashes) are dropped, so
    /// `"/a//b/"` and `"a/b"` are the same key. An empty string yields [`Key::ROOT`].
    pub fn new(path: impl AsRef<str>) -> Self {
        Key {
            parts: split(path.as_ref()).collect(),
        }
    }

    /// Build a key from individual segments
    ///
    /// Each segment is itself split on `/`, so `from_parts(["a/b", "c"])` equals `new("a/b/c")`.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = Key::ROOT;
        for part in parts {
            key.parts.extend(split(part.as_ref()));
        }
        key
    }

    /// Compose a child key under `self`
    pub fn join(&self, child: impl AsRef<str>) -> Self {
        let mut parts = self.parts.clone();
        parts.extend(split(child.as_ref()));
        Key { parts }
    }

    /// Concatenate two keys
    pub fn concat(&self, other: &Key) -> Self {
        let mut parts = self.parts.clone();
        parts.extend(other.parts.iter().cloned());
        Key { parts }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// Last segment, `None` for root
    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// Parent key, `None` for root
    pub fn parent(&self) -> Option<Key> {
        if self.parts.is_empty() {
            None
        } else {
            Some(Key {
                parts: self.parts[..self.parts.len() - 1].to_vec(),
            })
        }
    }

    /// Segment-wise prefix test: `a/bc` starts with `a` but not with `a/b`
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.parts.len() >= prefix.parts.len() && self.parts[..prefix.parts.len()] == prefix.parts[..]
    }

    /// Remove `prefix` from the front of this key
    pub fn strip_prefix(&self, prefix: &Key) -> Option<Key> {
        if self.starts_with(prefix) {
            Some(Key {
                parts: self.parts[prefix.parts.len()..].to_vec(),
            })
        } else {
            None
        }
    }

    /// The `/`-joined string form; empty for root
    pub fn string(&self) -> String {
        self.parts.join("/")
    }
}

fn split(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split(DELIMITER)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string())
    }
}

impl From<&str> for Key {
    fn from(path: &str) -> Self {
        Key::new(path)
    }
}

impl From<String> for Key {
    fn from(path: String) -> Self {
        Key::new(path)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.string())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Key::new)
    }
}
