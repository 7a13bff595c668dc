//! Trait interfaces between the wallet engine and its collaborators.
//!
//! - [`DataProvider`]: blockchain data service (brook-esplora implements)
//! - [`KeyValueStore`]: persistent string store (brook-store implements)

use async_trait::async_trait;

use crate::error::{ProviderError, StoreError};
use crate::types::{AddressLookup, BroadcastResponse, ProviderUtxo, StoreKey};

/// Remote source of address usage, unspent outputs and transaction relay.
///
/// Implementations must be safe to query concurrently; discovery fans out
/// many `address_info` calls at once.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Usage summary for one address. A well-formed refusal from the
    /// provider comes back as [`AddressLookup::Error`], not as `Err`.
    async fn address_info(&self, address: &str) -> Result<AddressLookup, ProviderError>;

    /// Unspent outputs currently paying `address`, confirmed or not.
    async fn utxos(&self, address: &str) -> Result<Vec<ProviderUtxo>, ProviderError>;

    /// Submit a raw transaction in hex.
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastResponse, ProviderError>;
}

/// Persistent string-to-string store for wallet state.
///
/// Values are JSON documents or plain strings; the engine owns the encoding.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Returns `None` if the key was never written or was removed.
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: StoreKey, value: String) -> Result<(), StoreError>;

    /// Remove a value. Removing an absent key is not an error.
    async fn remove(&self, key: StoreKey) -> Result<(), StoreError>;

    /// Remove every engine key.
    async fn clear(&self) -> Result<(), StoreError> {
        for key in StoreKey::ALL {
            self.remove(key).await?;
        }
        Ok(())
    }
}
