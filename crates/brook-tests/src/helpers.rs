//! Shared helpers for integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Address, Network, Transaction, Txid};
use parking_lot::Mutex;

use brook_core::error::ProviderError;
use brook_core::traits::{DataProvider, KeyValueStore};
use brook_core::types::{
    AddressInfo, AddressLookup, BranchKind, BroadcastResponse, ProviderUtxo, UtxoStatus,
};
use brook_store::MemoryStore;
use brook_wallet::{EngineConfig, KeyTree, MnemonicSeed, Wallet};

/// BIP-39 test phrase; `m/44'/1'/0'/0/0` is `mkpZhYtJu2r87Js3pDiWJDmPte2NRZ8bJV`.
pub const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
    abandon abandon abandon abandon abandon about";

/// A second valid phrase, used for third-party addresses.
pub const LEGAL_WINNER: &str = "legal winner thank year wave sausage worth useful \
    legal winner thank yellow";

pub fn tree(phrase: &str) -> KeyTree {
    let mnemonic = MnemonicSeed::parse(phrase).unwrap();
    KeyTree::from_mnemonic(&mnemonic).unwrap()
}

pub fn address(keys: &KeyTree, kind: BranchKind, index: u32) -> String {
    keys.derive_address(kind, index).unwrap().address
}

/// An address the test wallet does not own.
pub fn foreign_address(index: u32) -> String {
    address(&tree(LEGAL_WINNER), BranchKind::Receiving, index)
}

/// Distinct funding txid per `n`.
pub fn funding_txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

/// Provider and store, wired into a wallet with `config`.
pub fn wallet_with(ledger: &Arc<SimLedger>, store: Arc<dyn KeyValueStore>, config: EngineConfig) -> Wallet {
    Wallet::new(ledger.clone(), store, config)
}

/// Wallet over `ledger` with a fresh memory store and default config.
pub fn memory_wallet(ledger: &Arc<SimLedger>) -> (Wallet, MemoryStore) {
    let store = MemoryStore::new();
    (
        wallet_with(ledger, Arc::new(store.clone()), EngineConfig::default()),
        store,
    )
}

#[derive(Default)]
struct LedgerState {
    tx_counts: HashMap<String, u64>,
    unspent: HashMap<String, Vec<ProviderUtxo>>,
    invalid: HashMap<String, String>,
    rejection: Option<String>,
    broadcasts: Vec<Transaction>,
    info_calls: usize,
}

/// In-process stand-in for an Esplora instance.
///
/// Accepted broadcasts spend their inputs and create unconfirmed outputs
/// on the addresses they pay, the way a mempool would.
#[derive(Default)]
pub struct SimLedger {
    state: Mutex<LedgerState>,
}

impl SimLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pay `value` to `address` in a transaction of its own.
    pub fn fund(&self, address: &str, txid: Txid, vout: u32, value: u64, confirmed: bool) {
        let mut state = self.state.lock();
        *state.tx_counts.entry(address.to_string()).or_default() += 1;
        state
            .unspent
            .entry(address.to_string())
            .or_default()
            .push(ProviderUtxo {
                txid,
                vout,
                value,
                status: status(confirmed),
            });
    }

    /// Record history for `address` without leaving anything unspent.
    pub fn touch(&self, address: &str) {
        *self.state.lock().tx_counts.entry(address.to_string()).or_default() += 1;
    }

    /// Make the address-info endpoint refuse `address`.
    pub fn mark_invalid(&self, address: &str, message: &str) {
        self.state
            .lock()
            .invalid
            .insert(address.to_string(), message.to_string());
    }

    pub fn reject_broadcasts(&self, message: &str) {
        self.state.lock().rejection = Some(message.to_string());
    }

    /// Mine everything in the mempool.
    pub fn confirm_all(&self) {
        for utxos in self.state.lock().unspent.values_mut() {
            for utxo in utxos.iter_mut() {
                utxo.status = status(true);
            }
        }
    }

    pub fn tx_count(&self, address: &str) -> u64 {
        self.state.lock().tx_counts.get(address).copied().unwrap_or(0)
    }

    /// Unspent value held by `address`, confirmed or not.
    pub fn balance_of(&self, address: &str) -> u64 {
        self.state
            .lock()
            .unspent
            .get(address)
            .map(|u| u.iter().map(|x| x.value).sum())
            .unwrap_or(0)
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().broadcasts.clone()
    }

    pub fn info_calls(&self) -> usize {
        self.state.lock().info_calls
    }
}

fn status(confirmed: bool) -> UtxoStatus {
    UtxoStatus {
        confirmed,
        block_height: confirmed.then_some(2_500_000),
    }
}

fn decode(raw: &str) -> Result<Transaction, ProviderError> {
    let bytes = hex::decode(raw).map_err(|e| ProviderError::Decode(e.to_string()))?;
    bitcoin::consensus::deserialize(&bytes).map_err(|e| ProviderError::Decode(e.to_string()))
}

#[async_trait]
impl DataProvider for SimLedger {
    async fn address_info(&self, address: &str) -> Result<AddressLookup, ProviderError> {
        let mut state = self.state.lock();
        state.info_calls += 1;
        if let Some(message) = state.invalid.get(address) {
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
        Ok(self.state.lock().unspent.get(address).cloned().unwrap_or_default())
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<BroadcastResponse, ProviderError> {
        let tx = decode(raw_tx_hex)?;
        let mut state = self.state.lock();
        if let Some(message) = &state.rejection {
            return Ok(BroadcastResponse::rejected(message.clone()));
        }

        // Every input must be unspent before anything changes.
        for input in &tx.input {
            let prev = input.previous_output;
            let known = state
                .unspent
                .values()
                .any(|u| u.iter().any(|x| x.txid == prev.txid && x.vout == prev.vout));
            if !known {
                return Ok(BroadcastResponse::rejected("bad-txns-inputs-missingorspent"));
            }
        }

        let mut spenders = Vec::new();
        for input in &tx.input {
            let prev = input.previous_output;
            for (addr, utxos) in state.unspent.iter_mut() {
                let before = utxos.len();
                utxos.retain(|x| !(x.txid == prev.txid && x.vout == prev.vout));
                if utxos.len() != before {
                    spenders.push(addr.clone());
                }
            }
        }
        spenders.sort();
        spenders.dedup();
        for addr in spenders {
            *state.tx_counts.entry(addr).or_default() += 1;
        }

        let txid = tx.compute_txid();
        for (vout, output) in tx.output.iter().enumerate() {
            let Ok(addr) = Address::from_script(&output.script_pubkey, Network::Testnet) else {
                continue;
            };
            let addr = addr.to_string();
            *state.tx_counts.entry(addr.clone()).or_default() += 1;
            state.unspent.entry(addr).or_default().push(ProviderUtxo {
                txid,
                vout: vout as u32,
                value: output.value.to_sat(),
                status: status(false),
            });
        }
        state.broadcasts.push(tx);
        Ok(BroadcastResponse::accepted(txid.to_string()))
    }
}
