//! Hand-written collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Transaction, Txid};

use brook_core::error::{ProviderError, StoreError};
use brook_core::traits::{DataProvider, KeyValueStore};
use brook_core::types::{
    AddressInfo, AddressLookup, BranchKind, BroadcastResponse, ProviderUtxo, StoreKey, Utxo,
    UtxoStatus,
};

use crate::keys::KeyTree;
use crate::mnemonic::MnemonicSeed;

pub const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
    abandon abandon abandon abandon abandon about";

pub fn test_tree() -> KeyTree {
    let m = MnemonicSeed::parse(ABANDON_ABOUT).unwrap();
    KeyTree::from_mnemonic(&m).unwrap()
}

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

pub fn address_at(tree: &KeyTree, kind: BranchKind, index: u32) -> String {
    tree.derive_address(kind, index).unwrap().address
}

/// A wallet-owned UTXO on `kind/index` of the test tree.
pub fn utxo_at(tree: &KeyTree, kind: BranchKind, index: u32, value: u64, confirmed: bool) -> Utxo {
    let derived = tree.derive_address(kind, index).unwrap();
    Utxo {
        txid: txid(index as u8 + 1),
        vout: 0,
        value,
        confirmed,
        address: derived.address,
        derive_path: derived.path,
    }
}

#[derive(Default)]
struct ProviderState {
    tx_counts: HashMap<String, u64>,
    rejected: HashMap<String, String>,
    failing: HashSet<String>,
    utxos: HashMap<String, Vec<ProviderUtxo>>,
    broadcast_rejection: Option<String>,
    info_calls: Vec<String>,
    broadcasts: Vec<String>,
}

/// Scripted data provider. Unknown addresses have no transactions.
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<ProviderState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tx_count(&self, address: &str, count: u64) {
        self.state.lock().unwrap().tx_counts.insert(address.to_string(), count);
    }

    /// Mark `kind/[start, end)` of the test tree as used.
    pub fn use_range(&self, tree: &KeyTree, kind: BranchKind, start: u32, end: u32) {
        for i in start..end {
            self.set_tx_count(&address_at(tree, kind, i), 1);
        }
    }

    pub fn fail_address(&self, address: &str) {
        self.state.lock().unwrap().failing.insert(address.to_string());
    }

    pub fn reject_address(&self, address: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert(address.to_string(), message.to_string());
    }

    pub fn add_utxo(&self, address: &str, txid: Txid, vout: u32, value: u64, confirmed: bool) {
        self.state
            .lock()
            .unwrap()
            .utxos
            .entry(address.to_string())
            .or_default()
            .push(ProviderUtxo {
                txid,
                vout,
                value,
                status: UtxoStatus {
                    confirmed,
                    block_height: confirmed.then_some(2_500_000),
                },
            });
    }

    pub fn reject_broadcasts(&self, message: &str) {
        self.state.lock().unwrap().broadcast_rejection = Some(message.to_string());
    }

    pub fn info_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().info_calls.clone()
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcasts.clone()
    }
}

#[async_trait]
impl DataProvider for MockProvider {
    async fn address_info(&self, address: &str) -> Result<AddressLookup, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.info_calls.push(address.to_string());
        if state.failing.contains(address) {
            return Err(ProviderError::Transport("connection reset".into()));
        }
        if let Some(message) = state.rejected.get(address) {
            return Ok(AddressLookup::Error {
                error: message.clone(),
            });
        }
        Ok(AddressLookup::Found(AddressInfo {
            address: address.to_string(),
            transaction_count: state.tx_counts.get(address).copied().unwrap_or(0),
        }))
    }

    async fn utxos(&self, address: &str) -> Result<Vec<ProviderUtxo>, ProviderError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(address) {
            return Err(ProviderError::Transport("connection reset".into()));
        }
        Ok(state.utxos.get(address).cloned().unwrap_or_default())
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastResponse, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.broadcasts.push(raw_tx_hex.to_string());
        if let Some(message) = &state.broadcast_rejection {
            return Ok(BroadcastResponse::rejected(message.clone()));
        }
        let bytes = hex::decode(raw_tx_hex).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let tx: Transaction = bitcoin::consensus::deserialize(&bytes)
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(BroadcastResponse::accepted(tx.compute_txid().to_string()))
    }
}

/// In-memory store that records writes and can be told to fail them.
#[derive(Default)]
pub struct MockStore {
    values: Mutex<HashMap<StoreKey, String>>,
    writes: Mutex<Vec<StoreKey>>,
    fail_writes: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: StoreKey) -> Option<String> {
        self.values.lock().unwrap().get(&key).cloned()
    }

    pub fn put_raw(&self, key: StoreKey, value: &str) {
        self.values.lock().unwrap().insert(key, value.to_string());
    }

    pub fn writes(&self) -> Vec<StoreKey> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for MockStore {
    async fn get(&self, key: StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().unwrap().get(&key).cloned())
    }

    async fn set(&self, key: StoreKey, value: String) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io("read-only".into()));
        }
        self.writes.lock().unwrap().push(key);
        self.values.lock().unwrap().insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        self.values.lock().unwrap().remove(&key);
        Ok(())
    }
}
