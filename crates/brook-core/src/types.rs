//! Engine data model: branches of derived addresses, spendable outputs,
//! selection results, and the typed shapes of data-provider responses.
//!
//! All monetary values are in satoshis.

use std::collections::BTreeMap;
use std::fmt;

use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};

use crate::constants::{CHANGE_BRANCH_PATH, RECEIVING_BRANCH_PATH};

// ------------------------------------------------------------------
// Branches and addresses
// ------------------------------------------------------------------

/// One of the two address sub-trees under the wallet account.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    /// External chain (`.../0`), handed out to payers.
    Receiving,
    /// Internal chain (`.../1`), receives leftover value from sends.
    Change,
}

impl BranchKind {
    /// Both branches, receiving first.
    pub const ALL: [BranchKind; 2] = [BranchKind::Receiving, BranchKind::Change];

    /// Non-hardened child number of this branch under the account node.
    pub fn child_number(self) -> u32 {
        match self {
            Self::Receiving => 0,
            Self::Change => 1,
        }
    }

    /// Full derivation path of the branch node.
    pub fn path(self) -> &'static str {
        match self {
            Self::Receiving => RECEIVING_BRANCH_PATH,
            Self::Change => CHANGE_BRANCH_PATH,
        }
    }

    /// Store key holding this branch's address map.
    pub fn map_key(self) -> StoreKey {
        match self {
            Self::Receiving => StoreKey::ReceivingAddressMap,
            Self::Change => StoreKey::ChangeAddressMap,
        }
    }

    /// Store key holding this branch's active address.
    pub fn active_key(self) -> StoreKey {
        match self {
            Self::Receiving => StoreKey::ActiveReceivingAddress,
            Self::Change => StoreKey::ActiveChangeAddress,
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receiving => f.write_str("receiving"),
            Self::Change => f.write_str("change"),
        }
    }
}

/// Logical keys of the persistent key-value store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Mnemonic,
    ReceivingAddressMap,
    ChangeAddressMap,
    ActiveChangeAddress,
    ActiveReceivingAddress,
}

impl StoreKey {
    pub const ALL: [StoreKey; 5] = [
        StoreKey::Mnemonic,
        StoreKey::ReceivingAddressMap,
        StoreKey::ChangeAddressMap,
        StoreKey::ActiveChangeAddress,
        StoreKey::ActiveReceivingAddress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mnemonic => "mnemonic",
            Self::ReceivingAddressMap => "receiving-address-map",
            Self::ChangeAddressMap => "change-address-map",
            Self::ActiveChangeAddress => "active-change-address",
            Self::ActiveReceivingAddress => "active-receiving-address",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An address produced by deriving a branch child. Identified by its path.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DerivedAddress {
    /// Child index within the branch.
    pub index: u32,
    /// Full derivation path, e.g. `m/44'/1'/0'/0/3`.
    pub path: String,
    /// Encoded testnet address.
    pub address: String,
}

/// A derived address after the provider has classified it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AddressRecord {
    pub address: String,
    pub index: u32,
    pub derive_path: String,
    pub is_used: bool,
}

impl AddressRecord {
    /// Attach a usage classification to a derived address.
    pub fn classify(derived: DerivedAddress, is_used: bool) -> Self {
        Self {
            address: derived.address,
            index: derived.index,
            derive_path: derived.path,
            is_used,
        }
    }
}

/// Known addresses of one branch, keyed by child index, plus the size of
/// the batch the last discovery pass scanned.
///
/// Index uniqueness follows from the map key. `is_used` only ever moves
/// from `false` to `true`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    kind: BranchKind,
    batch_size: u32,
    records: BTreeMap<u32, AddressRecord>,
}

impl Branch {
    /// An empty branch that will be scanned `batch_size` addresses at a time.
    pub fn new(kind: BranchKind, batch_size: u32) -> Self {
        Self {
            kind,
            batch_size,
            records: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> BranchKind {
        self.kind
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Raise the batch size. Never shrinks it.
    pub fn raise_batch_size(&mut self, batch_size: u32) {
        self.batch_size = self.batch_size.max(batch_size);
    }

    /// Records in ascending index order.
    pub fn records(&self) -> impl Iterator<Item = &AddressRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&AddressRecord> {
        self.records.get(&index)
    }

    /// Look up a record by its encoded address.
    pub fn find(&self, address: &str) -> Option<&AddressRecord> {
        self.records.values().find(|r| r.address == address)
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.find(address).is_some()
    }

    /// Insert or replace the record at its index. A stored `is_used = true`
    /// survives a replacement that says otherwise.
    pub fn insert(&mut self, mut record: AddressRecord) {
        if let Some(existing) = self.records.get(&record.index) {
            record.is_used |= existing.is_used;
        }
        self.records.insert(record.index, record);
    }

    /// Mark the record holding `address` as used. Returns `false` if the
    /// address is not part of this branch.
    pub fn mark_used(&mut self, address: &str) -> bool {
        match self.records.values_mut().find(|r| r.address == address) {
            Some(record) => {
                record.is_used = true;
                true
            }
            None => false,
        }
    }

    /// Carry `is_used = true` flags over from an older view of the branch.
    pub fn merge_usage(&mut self, older: &Branch) {
        for (index, record) in self.records.iter_mut() {
            if older.get(*index).is_some_and(|r| r.is_used) {
                record.is_used = true;
            }
        }
    }

    /// True when the branch has records and every one of them is used.
    pub fn all_used(&self) -> bool {
        !self.records.is_empty() && self.records.values().all(|r| r.is_used)
    }

    /// Records not yet classified as used, in index order.
    pub fn unused(&self) -> impl Iterator<Item = &AddressRecord> {
        self.records.values().filter(|r| !r.is_used)
    }

    /// Encoded addresses in index order.
    pub fn addresses(&self) -> Vec<String> {
        self.records.values().map(|r| r.address.clone()).collect()
    }
}

// ------------------------------------------------------------------
// Outputs, selection, broadcast
// ------------------------------------------------------------------

/// A wallet-owned unspent output, tagged with the path of the key that
/// can spend it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub confirmed: bool,
    /// Address the output pays to.
    pub address: String,
    /// Derivation path of the key owning `address`.
    pub derive_path: String,
}

impl Utxo {
    /// Scope a provider entry to the wallet record it was fetched for.
    pub fn from_provider(entry: ProviderUtxo, owner: &AddressRecord) -> Self {
        Self {
            txid: entry.txid,
            vout: entry.vout,
            value: entry.value,
            confirmed: entry.status.confirmed,
            address: owner.address.clone(),
            derive_path: owner.derive_path.clone(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

/// A requested payment output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub address: String,
    pub value: u64,
}

/// An output chosen by coin selection. `address == None` pays the current
/// change address, resolved when the transaction is built.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SelectedOutput {
    pub address: Option<String>,
    pub value: u64,
}

impl SelectedOutput {
    pub fn is_change(&self) -> bool {
        self.address.is_none()
    }
}

impl From<&Target> for SelectedOutput {
    fn from(target: &Target) -> Self {
        Self {
            address: Some(target.address.clone()),
            value: target.value,
        }
    }
}

/// Inputs and outputs chosen for a payment, and the fee they imply.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SelectionResult {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<SelectedOutput>,
    pub fee: u64,
}

impl SelectionResult {
    /// Sum of input values, saturating at `u64::MAX`.
    pub fn input_value(&self) -> u64 {
        self.inputs.iter().fold(0u64, |acc, u| acc.saturating_add(u.value))
    }

    pub fn output_value(&self) -> u64 {
        self.outputs.iter().fold(0u64, |acc, o| acc.saturating_add(o.value))
    }

    /// The change output, if selection decided one is worth creating.
    pub fn change_output(&self) -> Option<&SelectedOutput> {
        self.outputs.iter().find(|o| o.is_change())
    }
}

/// Outcome of a successful broadcast.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BroadcastReceipt {
    pub txid: Txid,
    pub fee: u64,
    /// Change address that received the fallback output, if any.
    pub change_address: Option<String>,
    /// Active change address after advancement.
    pub next_change_address: Option<String>,
    /// False when the transaction was accepted but the advanced change
    /// state could not be written to the store. The session is up to date
    /// either way.
    pub persisted: bool,
}

/// Balance over a UTXO set.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
    pub utxo_count: usize,
}

impl Balance {
    pub fn from_utxos<'a>(utxos: impl IntoIterator<Item = &'a Utxo>) -> Self {
        let mut balance = Balance::default();
        for utxo in utxos {
            if utxo.confirmed {
                balance.confirmed = balance.confirmed.saturating_add(utxo.value);
            } else {
                balance.unconfirmed = balance.unconfirmed.saturating_add(utxo.value);
            }
            balance.utxo_count += 1;
        }
        balance
    }

    pub fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.unconfirmed)
    }
}

// ------------------------------------------------------------------
// Data provider responses
// ------------------------------------------------------------------

/// Usage summary of one address.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    pub address: String,
    pub transaction_count: u64,
}

impl AddressInfo {
    pub fn is_used(&self) -> bool {
        self.transaction_count > 0
    }
}

/// Response of the address-info endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum AddressLookup {
    Found(AddressInfo),
    Error { error: String },
}

/// Confirmation status of a provider UTXO.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct UtxoStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
}

/// One entry of the unspent-outputs endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProviderUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub status: UtxoStatus,
}

/// Error body attached to a rejected broadcast.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProviderMessage {
    pub message: String,
}

/// Response of the broadcast endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BroadcastResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderMessage>,
}

impl BroadcastResponse {
    pub fn accepted(txid: impl Into<String>) -> Self {
        Self {
            success: true,
            txid: Some(txid.into()),
            error: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            txid: None,
            error: Some(ProviderMessage {
                message: message.into(),
            }),
        }
    }

    /// The rejection message, if the provider refused the transaction.
    pub fn rejection(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(
            self.error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "broadcast rejected".to_string()),
        )
    }
}
