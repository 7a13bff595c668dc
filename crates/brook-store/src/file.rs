//! JSON-file key-value store.
//!
//! All keys live in one JSON object. Every write rewrites the whole file
//! through a sibling temp file and a rename, so a crash mid-write leaves
//! the previous document intact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use brook_core::error::StoreError;
use brook_core::traits::KeyValueStore;
use brook_core::types::StoreKey;

/// Default file name inside a data directory.
pub const STORE_FILE_NAME: &str = "wallet-state.json";

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, reading it if it exists.
    ///
    /// Parent directories are created on first write, not here.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| StoreError::Corrupted {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(io_error(&path, e)),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Open `STORE_FILE_NAME` inside `dir`.
    pub async fn open_in(dir: &Path) -> Result<Self, StoreError> {
        Self::open(dir.join(STORE_FILE_NAME)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(parent, e))?;
            }
        }
        let json = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io(format!("{}: {e}", path.display()))
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key.as_str()).cloned())
    }

    async fn set(&self, key: StoreKey, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(key.as_str().to_string(), value);
        if let Err(e) = self.persist(&entries).await {
            // Keep memory and disk in agreement.
            match previous {
                Some(v) => entries.insert(key.as_str().to_string(), v),
                None => entries.remove(key.as_str()),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(previous) = entries.remove(key.as_str()) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries).await {
            entries.insert(key.as_str().to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let snapshot = std::mem::take(&mut *entries);
        if let Err(e) = self.persist(&entries).await {
            *entries = snapshot;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open_in(dir.path()).await.unwrap();
        assert_eq!(store.get(StoreKey::Mnemonic).await.unwrap(), None);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open_in(dir.path()).await.unwrap();
            store.set(StoreKey::Mnemonic, "abandon about".into()).await.unwrap();
            store
                .set(StoreKey::ActiveReceivingAddress, "mkpZ".into())
                .await
                .unwrap();
        }
        let store = FileStore::open_in(dir.path()).await.unwrap();
        assert_eq!(
            store.get(StoreKey::Mnemonic).await.unwrap().as_deref(),
            Some("abandon about")
        );
        assert_eq!(
            store.get(StoreKey::ActiveReceivingAddress).await.unwrap().as_deref(),
            Some("mkpZ")
        );
    }

    #[tokio::test]
    async fn file_uses_store_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open_in(dir.path()).await.unwrap();
        store.set(StoreKey::ChangeAddressMap, "{}".into()).await.unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        let doc: BTreeMap<String, String> = serde_json::from_str(&text).unwrap();
        assert_eq!(doc.get("change-address-map").map(String::as_str), Some("{}"));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn remove_and_clear_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open_in(dir.path()).await.unwrap();
        for key in StoreKey::ALL {
            store.set(key, "v".into()).await.unwrap();
        }
        store.remove(StoreKey::Mnemonic).await.unwrap();
        let reopened = FileStore::open_in(dir.path()).await.unwrap();
        assert_eq!(reopened.get(StoreKey::Mnemonic).await.unwrap(), None);
        assert!(reopened.get(StoreKey::ChangeAddressMap).await.unwrap().is_some());

        store.clear().await.unwrap();
        let reopened = FileStore::open_in(dir.path()).await.unwrap();
        for key in StoreKey::ALL {
            assert_eq!(reopened.get(key).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");
        let store = FileStore::open(&path).await.unwrap();
        store.set(StoreKey::Mnemonic, "x".into()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn garbage_file_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        std::fs::write(&path, b"garbage").unwrap();
        let err = FileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn empty_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORE_FILE_NAME);
        std::fs::write(&path, b"").unwrap();
        let store = FileStore::open(&path).await.unwrap();
        assert_eq!(store.get(StoreKey::Mnemonic).await.unwrap(), None);
    }
}
