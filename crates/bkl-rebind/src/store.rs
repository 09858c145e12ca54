//! Persistence object stores
//!
//! Paths are `/`-separated and relative, e.g. `entities/a1b2c3d4e5`.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Key-value store holding persisted state
#[async_trait]
pub trait PersistenceObjectStore: Send + Sync + fmt::Debug {
    /// Prepare the store; called before any other operation
    async fn prepare_for_use(&self) -> StoreResult<()>;

    /// Write (or replace) the content at a path
    async fn put(&self, path: &str, content: &str) -> StoreResult<()>;

    /// Read the content at a path
    async fn get(&self, path: &str) -> StoreResult<Option<String>>;

    /// Delete a path, returning whether it existed
    async fn delete(&self, path: &str) -> StoreResult<bool>;

    /// Names of the entries directly under a directory, sorted
    async fn list(&self, dir: &str) -> StoreResult<Vec<String>>;

    /// Whether a path holds content
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Human-readable description
    fn summary(&self) -> String;
}

/// Reject paths that are empty or escape the store
fn validate(path: &str) -> StoreResult<&Path> {
    let candidate = Path::new(path);
    let well_formed = !path.is_empty()
        && !path.contains('\\')
        && candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if well_formed {
        Ok(candidate)
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Store keeping one file per path under a base directory
///
/// Writes go to a `.tmp` sibling which is then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileBasedObjectStore {
    base: PathBuf,
}

impl FileBasedObjectStore {
    const TMP_SUFFIX: &'static str = ".tmp";

    /// Create store rooted at `base`
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Base directory
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        Ok(self.base.join(validate(path)?))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl PersistenceObjectStore for FileBasedObjectStore {
    async fn prepare_for_use(&self) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.base)
            .await
            .map_err(|e| io_error(&self.base, e))?;
        info!(store = %self.summary(), "object store ready");
        Ok(())
    }

    async fn put(&self, path: &str, content: &str) -> StoreResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let mut tmp = target.clone().into_os_string();
        tmp.push(Self::TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| io_error(&target, e))?;
        debug!(path, bytes = content.len(), "stored");
        Ok(())
    }

    async fn get(&self, path: &str) -> StoreResult<Option<String>> {
        let target = self.resolve(path)?;
        match tokio::fs::read_to_string(&target).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&target, e)),
        }
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&target, e)),
        }
    }

    async fn list(&self, dir: &str) -> StoreResult<Vec<String>> {
        let target = self.resolve(dir)?;
        let mut entries = match tokio::fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&target, e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&target, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(Self::TMP_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn summary(&self) -> String {
        format!("file store at {}", self.base.display())
    }
}

/// Store keeping everything in memory
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryObjectStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored paths
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl PersistenceObjectStore for InMemoryObjectStore {
    async fn prepare_for_use(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn put(&self, path: &str, content: &str) -> StoreResult<()> {
        validate(path)?;
        self.entries
            .write()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn get(&self, path: &str) -> StoreResult<Option<String>> {
        validate(path)?;
        Ok(self.entries.read().get(path).cloned())
    }

    async fn delete(&self, path: &str) -> StoreResult<bool> {
        validate(path)?;
        Ok(self.entries.write().remove(path).is_some())
    }

    async fn list(&self, dir: &str) -> StoreResult<Vec<String>> {
        validate(dir)?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .entries
            .read()
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn summary(&self) -> String {
        format!("in-memory store with {} entries", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_rejected() {
        for bad in ["", "../x", "a/../../b", "/etc/passwd", "a\\b", "./a"] {
            assert!(validate(bad).is_err(), "accepted {bad:?}");
        }
        assert!(validate("entities/abc").is_ok());
    }

    #[tokio::test]
    async fn memory_store_lists_direct_children() {
        let store = InMemoryObjectStore::new();
        store.put("entities/a", "1").await.unwrap();
        store.put("entities/b", "2").await.unwrap();
        store.put("entities/sub/c", "3").await.unwrap();
        store.put("locations/l", "4").await.unwrap();

        assert_eq!(store.list("entities").await.unwrap(), vec!["a", "b"]);
        assert!(store.exists("locations/l").await.unwrap());
        assert!(store.delete("entities/a").await.unwrap());
        assert!(!store.delete("entities/a").await.unwrap());
        assert_eq!(store.get("entities/a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBasedObjectStore::new(dir.path().join("state"));
        store.prepare_for_use().await.unwrap();

        store.put("entities/e1", "{}").await.unwrap();
        store.put("entities/e1", "{\"v\":2}").await.unwrap();
        store.put("plane/record", "{}").await.unwrap();

        assert_eq!(
            store.get("entities/e1").await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );
        assert_eq!(store.list("entities").await.unwrap(), vec!["e1"]);
        assert_eq!(store.list("feeds").await.unwrap(), Vec::<String>::new());
        assert!(store.delete("entities/e1").await.unwrap());
        assert_eq!(store.get("entities/e1").await.unwrap(), None);
        assert!(store.put("../escape", "x").await.is_err());
    }
}
