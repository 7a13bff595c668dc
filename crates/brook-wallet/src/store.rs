//! Typed access to the persistent key-value store.
//!
//! Branch maps are stored as JSON, the mnemonic and active addresses as
//! plain strings.

use std::sync::Arc;

use brook_core::error::StoreError;
use brook_core::traits::KeyValueStore;
use brook_core::types::{Branch, BranchKind, StoreKey};

use crate::error::WalletError;

/// Wallet-shaped view over a [`KeyValueStore`].
#[derive(Clone)]
pub struct WalletStore {
    inner: Arc<dyn KeyValueStore>,
}

impl WalletStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    pub async fn load_mnemonic(&self) -> Result<Option<String>, WalletError> {
        Ok(self.inner.get(StoreKey::Mnemonic).await?)
    }

    pub async fn save_mnemonic(&self, phrase: &str) -> Result<(), WalletError> {
        self.inner.set(StoreKey::Mnemonic, phrase.to_string()).await?;
        Ok(())
    }

    /// Load a persisted branch. An entry that does not decode, or that
    /// decodes to the other branch, is reported as corrupted.
    pub async fn load_branch(&self, kind: BranchKind) -> Result<Option<Branch>, WalletError> {
        let key = kind.map_key();
        let Some(raw) = self.inner.get(key).await? else {
            return Ok(None);
        };
        let branch: Branch = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupted {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if branch.kind() != kind {
            return Err(StoreError::Corrupted {
                key: key.to_string(),
                reason: format!("holds the {} branch", branch.kind()),
            }
            .into());
        }
        Ok(Some(branch))
    }

    pub async fn save_branch(&self, branch: &Branch) -> Result<(), WalletError> {
        let json = serde_json::to_string(branch)?;
        self.inner.set(branch.kind().map_key(), json).await?;
        Ok(())
    }

    pub async fn load_active(&self, kind: BranchKind) -> Result<Option<String>, WalletError> {
        Ok(self.inner.get(kind.active_key()).await?)
    }

    pub async fn save_active(&self, kind: BranchKind, address: &str) -> Result<(), WalletError> {
        self.inner.set(kind.active_key(), address.to_string()).await?;
        Ok(())
    }

    /// Remove every wallet key.
    pub async fn clear(&self) -> Result<(), WalletError> {
        self.inner.clear().await?;
        Ok(())
    }
}

impl std::fmt::Debug for WalletStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletStore").finish_non_exhaustive()
    }
}
