//! Local filesystem storage backend
//!
//! Each key maps to a regular file below a root directory, one directory level
//! per key segment. Saves stream into a temporary file in a private directory
//! under the root and are renamed into place once the content has been fully
//! written, so readers never observe a partially written value.

use super::{KeyGuard, KeyLocks, Storage};
use crate::content::Content;
use crate::error::{Result, VaultError};
use crate::key::Key;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::{stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Directory under the root holding in-flight saves
const TEMP_DIR: &str = ".pkgvault-tmp";

const READ_CHUNK: usize = 64 * 1024;

/// Storage backed by a directory on the local filesystem
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    locks: KeyLocks,
    temp_counter: AtomicU64,
}

impl FileStorage {
    /// Storage rooted at `root`
    ///
    /// No filesystem access happens here, so construction is safe on async
    /// paths. The root directory is created by the first save; until then the
    /// storage reads as empty.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the path is relative.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            return Err(VaultError::ConfigError(format!(
                "storage path must be absolute: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            locks: KeyLocks::new(),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a key; rejects keys that could escape the root
    fn path(&self, key: &Key) -> Result<PathBuf> {
        if key.is_root() {
            return Err(VaultError::InvalidKey("root key has no file".to_string()));
        }
        let mut path = self.root.clone();
        for (index, part) in key.parts().iter().enumerate() {
            if part == "." || part == ".." || part.contains('\\') || part.contains('\0') {
                return Err(VaultError::InvalidKey(format!("illegal segment `{}` in {}", part, key)));
            }
            if index == 0 && part == TEMP_DIR {
                return Err(VaultError::InvalidKey(format!("reserved segment in {}", key)));
            }
            path.push(part);
        }
        Ok(path)
    }

    fn map_io_error(err: std::io::Error, key: &Key) -> VaultError {
        match err.kind() {
            std::io::ErrorKind::NotFound => VaultError::not_found(key),
            _ => VaultError::IoError(format!("{}: {}", key, err)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let id = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(TEMP_DIR)
            .join(format!("{}-{}.part", std::process::id(), id))
    }

    async fn write_temp(temp: &Path, content: Content) -> Result<()> {
        let mut file = File::create(temp).await?;
        let mut chunks = content.into_stream();
        while let Some(chunk) = chunks.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Rename a finished temporary file to `target`, creating its parents
    async fn place(temp: &Path, target: &Path) -> std::io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(temp, target).await
    }

    /// Remove directories left empty by a delete, up to the root
    async fn prune_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // Fails when the directory still has entries
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    fn key_for(&self, path: &Path) -> Option<Key> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
        parts.map(Key::from_parts)
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn identifier(&self) -> String {
        format!("fs:{}", self.root.display())
    }

    async fn exists(&self, key: &Key) -> Result<bool> {
        let path = self.path(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, key)),
        }
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let start = if prefix.is_root() {
            self.root.clone()
        } else {
            self.path(prefix)?
        };
        if fs::metadata(&start).await.map(|m| m.is_file()).unwrap_or(false) {
            return Ok(vec![prefix.clone()]);
        }

        let mut keys = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                // Listing a prefix that does not exist is an empty result
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::map_io_error(e, prefix)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if current == self.root && entry.file_name() == TEMP_DIR {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    match self.key_for(&path) {
                        Some(key) => keys.push(key),
                        None => warn!("Skipping non UTF-8 path {}", path.display()),
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        let target = self.path(key)?;
        let temp = self.temp_path();
        fs::create_dir_all(self.root.join(TEMP_DIR)).await?;

        if let Err(e) = Self::write_temp(&temp, content).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        let mut placed = Self::place(&temp, &target).await;
        if matches!(&placed, Err(e) if e.kind() == std::io::ErrorKind::NotFound) {
            // A concurrent delete can prune the parent between create and rename
            debug!("Parent of {} vanished, retrying", key);
            placed = Self::place(&temp, &target).await;
        }
        if let Err(e) = placed {
            let _ = fs::remove_file(&temp).await;
            return Err(Self::map_io_error(e, key));
        }
        debug!("Saved {} to {}", key, target.display());
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        let path = self.path(key)?;
        let file = File::open(&path).await.map_err(|e| Self::map_io_error(e, key))?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(VaultError::not_found(key));
        }
        let chunks = stream::try_unfold(file, |mut file| async move {
            let mut buffer = BytesMut::with_capacity(READ_CHUNK);
            let read = file.read_buf(&mut buffer).await.map_err(VaultError::from)?;
            if read == 0 {
                Ok::<_, VaultError>(None)
            } else {
                Ok(Some((buffer.freeze(), file)))
            }
        });
        Ok(Content::from_stream(chunks, Some(metadata.len())))
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> Result<()> {
        let from = self.path(source)?;
        let to = self.path(destination)?;
        if !self.exists(source).await? {
            return Err(VaultError::not_found(source));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from, &to).await.map_err(|e| Self::map_io_error(e, source))?;
        self.prune_parents(&from).await;
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let path = self.path(key)?;
        if !self.exists(key).await? {
            return Err(VaultError::not_found(key));
        }
        fs::remove_file(&path).await.map_err(|e| Self::map_io_error(e, key))?;
        self.prune_parents(&path).await;
        Ok(())
    }

    async fn size(&self, key: &Key) -> Result<u64> {
        let path = self.path(key)?;
        let metadata = fs::metadata(&path).await.map_err(|e| Self::map_io_error(e, key))?;
        if metadata.is_file() {
            Ok(metadata.len())
        } else {
            Err(VaultError::not_found(key))
        }
    }

    async fn lock(&self, key: &Key) -> KeyGuard {
        self.locks.acquire(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn storage() -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_relative_root_rejected() {
        assert!(matches!(
            FileStorage::new("relative/path"),
            Err(VaultError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_root_created_on_first_save() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("lazy/root");
        let storage = FileStorage::new(&root).unwrap();
        assert!(!root.exists());
        assert!(storage.list(&Key::ROOT).await.unwrap().is_empty());
        assert!(storage.value(&Key::new("a")).await.unwrap_err().is_not_found());

        storage.save(&Key::new("a"), Content::from_bytes("x")).await.unwrap();
        assert!(root.join("a").is_file());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_save_survives_concurrent_prune() {
        let (_dir, storage) = storage();
        let storage = std::sync::Arc::new(storage);
        for n in 0..50 {
            let old = Key::new("d/a/old");
            let new = Key::new(format!("d/a/new-{}", n));
            storage.save(&old, Content::from_bytes("old")).await.unwrap();

            let saver = {
                let storage = storage.clone();
                let new = new.clone();
                tokio::spawn(async move { storage.save(&new, Content::from_bytes("new")).await })
            };
            let deleter = {
                let storage = storage.clone();
                tokio::spawn(async move { storage.delete(&old).await })
            };
            saver.await.unwrap().unwrap();
            deleter.await.unwrap().unwrap();
            assert!(storage.exists(&new).await.unwrap());
            storage.delete(&new).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_save_read_nested() {
        let (dir, storage) = storage();
        let key = Key::new("org/lib/1.0/lib.jar");
        storage.save(&key, Content::from_bytes("jar")).await.unwrap();
        assert!(dir.path().join("org/lib/1.0/lib.jar").is_file());

        let content = storage.value(&key).await.unwrap();
        assert_eq!(content.size(), Some(3));
        assert_eq!(content.into_bytes().await.unwrap(), Bytes::from("jar"));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, storage) = storage();
        let err = storage.save(&Key::new("a/../../etc"), Content::empty()).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidKey(_)));
        let err = storage.value(&Key::new(TEMP_DIR).join("x")).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_list_skips_temp_and_sorts() {
        let (_dir, storage) = storage();
        for key in ["b/2", "a/1", "a/b/3"] {
            storage.save(&Key::new(key), Content::from_bytes("x")).await.unwrap();
        }
        let keys = storage.list(&Key::ROOT).await.unwrap();
        assert_eq!(keys, vec![Key::new("a/1"), Key::new("a/b/3"), Key::new("b/2")]);
        assert_eq!(storage.list(&Key::new("a/b")).await.unwrap(), vec![Key::new("a/b/3")]);
        assert_eq!(storage.list(&Key::new("a/1")).await.unwrap(), vec![Key::new("a/1")]);
        assert!(storage.list(&Key::new("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_value() {
        let (_dir, storage) = storage();
        storage.save(&Key::new("a/b"), Content::from_bytes("x")).await.unwrap();
        assert!(!storage.exists(&Key::new("a")).await.unwrap());
        assert!(storage.size(&Key::new("a")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_prunes_empty_dirs() {
        let (dir, storage) = storage();
        let key = Key::new("x/y/z");
        storage.save(&key, Content::from_bytes("x")).await.unwrap();
        storage.delete(&key).await.unwrap();
        assert!(!dir.path().join("x").exists());
        assert!(storage.delete(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_move_overwrites() {
        let (_dir, storage) = storage();
        storage.save(&Key::new("src"), Content::from_bytes("new")).await.unwrap();
        storage.save(&Key::new("dst/f"), Content::from_bytes("old")).await.unwrap();
        storage.move_to(&Key::new("src"), &Key::new("dst/f")).await.unwrap();
        let bytes = storage.value(&Key::new("dst/f")).await.unwrap().into_bytes().await.unwrap();
        assert_eq!(bytes, Bytes::from("new"));
        assert!(storage.move_to(&Key::new("src"), &Key::new("o")).await.unwrap_err().is_not_found());
    }
}
