//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use brook_core::error::StoreError;
use brook_core::traits::KeyValueStore;
use brook_core::types::StoreKey;

/// Process-local store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<StoreKey, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently set.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(&key).cloned())
    }

    async fn set(&self, key: StoreKey, value: String) -> Result<(), StoreError> {
        self.entries.write().insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        self.entries.write().remove(&key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get(StoreKey::Mnemonic).await.unwrap(), None);

        store.set(StoreKey::Mnemonic, "words".into()).await.unwrap();
        assert_eq!(store.get(StoreKey::Mnemonic).await.unwrap().as_deref(), Some("words"));

        store.remove(StoreKey::Mnemonic).await.unwrap();
        assert_eq!(store.get(StoreKey::Mnemonic).await.unwrap(), None);
        // Absent keys remove cleanly.
        store.remove(StoreKey::Mnemonic).await.unwrap();
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.set(StoreKey::ActiveChangeAddress, "mx".into()).await.unwrap();
        assert_eq!(b.get(StoreKey::ActiveChangeAddress).await.unwrap().as_deref(), Some("mx"));
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let store = MemoryStore::new();
        for key in StoreKey::ALL {
            store.set(key, key.to_string()).await.unwrap();
        }
        assert_eq!(store.len(), 5);
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
