//! BIP-32 key hierarchy and P2PKH address derivation.
//!
//! The root extended key comes from the BIP-39 seed. Addresses live under
//! `m/44'/1'/0'/{branch}/{index}` with non-hardened branch and index steps.
//! Branch nodes are derived once and cached; per-address derivation is a
//! single child step from them.

use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use bitcoin::{Address, PublicKey};

use brook_core::constants::NETWORK;
use brook_core::types::{BranchKind, DerivedAddress};

use crate::error::WalletError;
use crate::mnemonic::MnemonicSeed;

/// An extended private key at a known derivation path.
#[derive(Clone)]
pub struct KeyNode {
    path: DerivationPath,
    xpriv: Xpriv,
}

impl KeyNode {
    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn secret_key(&self) -> SecretKey {
        self.xpriv.private_key
    }

    pub fn public_key(&self, secp: &Secp256k1<All>) -> PublicKey {
        PublicKey::new(self.xpriv.private_key.public_key(secp))
    }

    /// Testnet P2PKH address of this node's public key.
    pub fn address(&self, secp: &Secp256k1<All>) -> Address {
        p2pkh_address(&self.public_key(secp))
    }
}

impl fmt::Debug for KeyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyNode")
            .field("path", &self.path.to_string())
            .field("xpriv", &"[REDACTED]")
            .finish()
    }
}

/// The wallet's key tree: root node plus cached branch nodes.
pub struct KeyTree {
    secp: Secp256k1<All>,
    root: Xpriv,
    receiving: Xpriv,
    change: Xpriv,
}

impl KeyTree {
    /// Derive the root node from a validated mnemonic.
    pub fn from_mnemonic(mnemonic: &MnemonicSeed) -> Result<Self, WalletError> {
        Self::from_seed(mnemonic.seed())
    }

    /// Derive the root node from a raw BIP-39 seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, WalletError> {
        let secp = Secp256k1::new();
        let root = Xpriv::new_master(NETWORK, seed)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let receiving = derive(&secp, &root, &parse_path(BranchKind::Receiving.path())?)?;
        let change = derive(&secp, &root, &parse_path(BranchKind::Change.path())?)?;
        Ok(Self {
            secp,
            root,
            receiving,
            change,
        })
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    /// Derive the node at an absolute path such as `m/44'/1'/0'/0/3`.
    ///
    /// Always walks from the root, never from a cached branch.
    pub fn derive_path(&self, path: &str) -> Result<KeyNode, WalletError> {
        let path = parse_path(path)?;
        let xpriv = derive(&self.secp, &self.root, &path)?;
        Ok(KeyNode { path, xpriv })
    }

    /// Derive child `index` of a branch.
    pub fn derive_child(&self, kind: BranchKind, index: u32) -> Result<KeyNode, WalletError> {
        let step = ChildNumber::from_normal_idx(index)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let parent = match kind {
            BranchKind::Receiving => &self.receiving,
            BranchKind::Change => &self.change,
        };
        let xpriv = derive(&self.secp, parent, &[step])?;
        let path = parse_path(&child_path(kind, index))?;
        Ok(KeyNode { path, xpriv })
    }

    /// Derive the address of child `index` of a branch.
    pub fn derive_address(&self, kind: BranchKind, index: u32) -> Result<DerivedAddress, WalletError> {
        let node = self.derive_child(kind, index)?;
        Ok(DerivedAddress {
            index,
            path: child_path(kind, index),
            address: node.address(&self.secp).to_string(),
        })
    }

    /// Derive `count` consecutive addresses of a branch starting at `start`.
    pub fn derive_batch(
        &self,
        kind: BranchKind,
        start: u32,
        count: u32,
    ) -> Result<Vec<DerivedAddress>, WalletError> {
        let end = start
            .checked_add(count)
            .ok_or_else(|| WalletError::KeyDerivation(format!("index overflow at {start}+{count}")))?;
        (start..end).map(|i| self.derive_address(kind, i)).collect()
    }
}

impl fmt::Debug for KeyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyTree")
            .field("network", &NETWORK)
            .field("root", &"[REDACTED]")
            .finish()
    }
}

/// Path string of child `index` on a branch.
pub fn child_path(kind: BranchKind, index: u32) -> String {
    format!("{}/{}", kind.path(), index)
}

/// Testnet P2PKH address for a public key.
pub fn p2pkh_address(public_key: &PublicKey) -> Address {
    Address::p2pkh(public_key.pubkey_hash(), NETWORK)
}

fn parse_path(path: &str) -> Result<DerivationPath, WalletError> {
    DerivationPath::from_str(path).map_err(|e| WalletError::KeyDerivation(format!("{path}: {e}")))
}

fn derive(
    secp: &Secp256k1<All>,
    parent: &Xpriv,
    path: &impl AsRef<[ChildNumber]>,
) -> Result<Xpriv, WalletError> {
    parent
        .derive_priv(secp, path)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))
}
