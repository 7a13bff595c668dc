//! State of a logged-in wallet.
//!
//! A [`WalletSession`] is owned by the caller and passed to each engine
//! operation. Readers use the accessors; only the engine mutates it.

use std::collections::HashSet;
use std::fmt;

use bitcoin::OutPoint;

use brook_core::types::{Balance, Branch, BranchKind, Utxo};

use crate::keys::KeyTree;
use crate::mnemonic::MnemonicSeed;

pub struct WalletSession {
    mnemonic: MnemonicSeed,
    keys: KeyTree,
    receiving: Branch,
    change: Branch,
    active_receiving: Option<String>,
    active_change: Option<String>,
    utxos: Vec<Utxo>,
}

impl WalletSession {
    pub(crate) fn new(mnemonic: MnemonicSeed, keys: KeyTree, receiving: Branch, change: Branch) -> Self {
        Self {
            mnemonic,
            keys,
            receiving,
            change,
            active_receiving: None,
            active_change: None,
            utxos: Vec::new(),
        }
    }

    pub fn mnemonic(&self) -> &MnemonicSeed {
        &self.mnemonic
    }

    /// Root of the key tree.
    pub fn keys(&self) -> &KeyTree {
        &self.keys
    }

    pub fn branch(&self, kind: BranchKind) -> &Branch {
        match kind {
            BranchKind::Receiving => &self.receiving,
            BranchKind::Change => &self.change,
        }
    }

    pub(crate) fn branch_mut(&mut self, kind: BranchKind) -> &mut Branch {
        match kind {
            BranchKind::Receiving => &mut self.receiving,
            BranchKind::Change => &mut self.change,
        }
    }

    pub(crate) fn replace_branch(&mut self, branch: Branch) {
        let kind = branch.kind();
        *self.branch_mut(kind) = branch;
    }

    pub fn active_address(&self, kind: BranchKind) -> Option<&str> {
        match kind {
            BranchKind::Receiving => self.active_receiving.as_deref(),
            BranchKind::Change => self.active_change.as_deref(),
        }
    }

    /// Address to hand out to payers.
    pub fn active_receiving_address(&self) -> Option<&str> {
        self.active_address(BranchKind::Receiving)
    }

    /// Address that receives the change output of the next send.
    pub fn active_change_address(&self) -> Option<&str> {
        self.active_address(BranchKind::Change)
    }

    pub(crate) fn set_active_address(&mut self, kind: BranchKind, address: Option<String>) {
        match kind {
            BranchKind::Receiving => self.active_receiving = address,
            BranchKind::Change => self.active_change = address,
        }
    }

    /// Every aggregated output, unconfirmed ones included.
    pub fn utxos(&self) -> &[Utxo] {
        &self.utxos
    }

    pub(crate) fn set_utxos(&mut self, utxos: Vec<Utxo>) {
        self.utxos = utxos;
    }

    /// Drop outputs spent by a broadcast transaction.
    pub(crate) fn prune_spent(&mut self, spent: &[OutPoint]) -> usize {
        let spent: HashSet<&OutPoint> = spent.iter().collect();
        let before = self.utxos.len();
        self.utxos.retain(|u| !spent.contains(&u.outpoint()));
        before - self.utxos.len()
    }

    pub fn balance(&self) -> Balance {
        Balance::from_utxos(&self.utxos)
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("receiving", &self.receiving.len())
            .field("change", &self.change.len())
            .field("active_receiving", &self.active_receiving)
            .field("active_change", &self.active_change)
            .field("utxos", &self.utxos.len())
            .finish_non_exhaustive()
    }
}
