//! Local persistent key-value store.
//!
//! The engine keeps its caches and pending-write queue in a
//! [`KeyValueStore`]. Values are opaque strings (JSON documents in practice).
//!
//! Two implementations are provided:
//! - [`MemoryStore`]: process-local, for tests and one-shot commands
//! - [`FileStore`]: a single JSON file, rewritten atomically on every change

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::api::BoxFuture;

/// Errors from the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is corrupt: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A specialized Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A string key-value store with last-write-wins semantics.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<String>>>;

    fn set(&self, key: &str, value: String) -> BoxFuture<'_, StoreResult<()>>;

    fn remove(&self, key: &str) -> BoxFuture<'_, StoreResult<()>>;

    /// Removes several keys in one write.
    fn remove_many(&self, keys: &[String]) -> BoxFuture<'_, StoreResult<()>>;

    /// Returns every key starting with `prefix`, in lexicographic order.
    fn keys_with_prefix(&self, prefix: &str) -> BoxFuture<'_, StoreResult<Vec<String>>>;
}

fn prefixed(map: &BTreeMap<String, String>, prefix: &str) -> Vec<String> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

/// A store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.entries.read().await.get(&key).cloned()) })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'_, StoreResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            self.entries.write().await.insert(key, value);
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> BoxFuture<'_, StoreResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            self.entries.write().await.remove(&key);
            Ok(())
        })
    }

    fn remove_many(&self, keys: &[String]) -> BoxFuture<'_, StoreResult<()>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            for key in keys {
                entries.remove(&key);
            }
            Ok(())
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> BoxFuture<'_, StoreResult<Vec<String>>> {
        let prefix = prefix.to_string();
        Box::pin(async move { Ok(prefixed(&*self.entries.read().await, &prefix)) })
    }
}

/// A store persisted as one JSON object in a file.
///
/// The whole map is loaded on open and kept in memory. Every mutation
/// rewrites the file through a temporary sibling followed by a rename, so a
/// crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is an empty store. A corrupt file is an error rather
    /// than being silently discarded.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io(parent, e))?;
            }
            _ => {}
        }

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| {
                StoreError::Serialization {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        debug!(path = %path.display(), keys = entries.len(), "Opened file store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(entries).map_err(|source| {
            StoreError::Serialization {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(path = %self.path.display(), error = %e, "Failed to replace store file");
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(&self.path, e));
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.entries.read().await.get(&key).cloned()) })
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'_, StoreResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            entries.insert(key, value);
            self.persist(&entries).await
        })
    }

    fn remove(&self, key: &str) -> BoxFuture<'_, StoreResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            if entries.remove(&key).is_none() {
                return Ok(());
            }
            self.persist(&entries).await
        })
    }

    fn remove_many(&self, keys: &[String]) -> BoxFuture<'_, StoreResult<()>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            for key in &keys {
                entries.remove(key);
            }
            if entries.len() == before {
                return Ok(());
            }
            self.persist(&entries).await
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> BoxFuture<'_, StoreResult<Vec<String>>> {
        let prefix = prefix.to_string();
        Box::pin(async move { Ok(prefixed(&*self.entries.read().await, &prefix)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_store_basics() {
        let store = MemoryStore::new();
        store.set("a:1", "one".into()).await.unwrap();
        store.set("a:2", "two".into()).await.unwrap();
        store.set("b:1", "three".into()).await.unwrap();

        assert_eq!(store.get("a:1").await.unwrap().as_deref(), Some("one"));
        assert_eq!(store.keys_with_prefix("a:").await.unwrap(), vec!["a:1", "a:2"]);

        store
            .remove_many(&["a:1".to_string(), "b:1".to_string()])
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.get("b:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        {
            let store = FileStore::open(&path).await.unwrap();
            store.set("prefs:alice", "{}".into()).await.unwrap();
            store.set("pending:x", "1".into()).await.unwrap();
            store.remove("pending:x").await.unwrap();
        }

        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.get("prefs:alice").await.unwrap().as_deref(), Some("{}"));
        assert!(store.get("pending:x").await.unwrap().is_none());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }
}
