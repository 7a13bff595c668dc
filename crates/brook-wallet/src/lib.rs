//! # brook-wallet: HD discovery and transaction engine for Bitcoin testnet.
//!
//! Derives a BIP-44 key tree from a mnemonic, discovers used and unused
//! addresses on the receiving and change branches in gap-limit batches,
//! aggregates unspent outputs, selects coins, signs P2PKH transactions and
//! broadcasts them, advancing the change address afterwards.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` and its `ErrorKind`
//! - [`config`]: `EngineConfig`, `NextAddressRule`
//! - [`mnemonic`]: BIP-39 phrase generation and validation
//! - [`keys`]: BIP-32 key tree and address derivation
//! - [`discovery`]: Gap-limit address discovery and next-address rules
//! - [`utxo`]: UTXO aggregation across known addresses
//! - [`coin_selection`]: Blackjack / accumulative coin selection
//! - [`builder`]: Transaction assembly and per-input signing
//! - [`broadcast`]: Broadcast and change-address advancement
//! - [`session`]: In-memory state of a logged-in wallet
//! - [`store`]: Typed access to the persistent key-value store
//! - [`wallet`]: High-level operations: login, restore, send

pub mod broadcast;
pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod discovery;
pub mod error;
pub mod keys;
pub mod mnemonic;
pub mod session;
pub mod store;
pub mod utxo;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use builder::{SignedTransaction, TransactionBuilder, UnsignedTransaction};
pub use coin_selection::select_coins;
pub use config::{EngineConfig, NextAddressRule};
pub use discovery::{Discovery, next_address};
pub use error::{ErrorKind, WalletError};
pub use keys::{KeyNode, KeyTree};
pub use mnemonic::MnemonicSeed;
pub use session::WalletSession;
pub use store::WalletStore;
pub use wallet::Wallet;
