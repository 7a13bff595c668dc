//! Engine constants. All monetary values in satoshis.

use bitcoin::Network;

/// The only network the engine signs for.
pub const NETWORK: Network = Network::Testnet;

/// BIP-44 purpose level (hardened).
pub const PURPOSE: u32 = 44;

/// SLIP-44 coin type for every test network (hardened).
pub const COIN_TYPE: u32 = 1;

/// The single account the engine manages (hardened).
pub const ACCOUNT: u32 = 0;

/// Derivation path of the receiving (external) branch.
pub const RECEIVING_BRANCH_PATH: &str = "m/44'/1'/0'/0";

/// Derivation path of the change (internal) branch.
pub const CHANGE_BRANCH_PATH: &str = "m/44'/1'/0'/1";

/// Addresses scanned by the first discovery pass on a fresh branch.
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Growth step applied whenever a whole batch comes back used.
pub const BATCH_INCREMENT: u32 = 10;

/// Upper bound on batch growth against a provider that reports every
/// address as used.
pub const MAX_BATCH_SIZE: u32 = 200;

/// Provider queries allowed in flight at once during a fan-out.
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 10;

/// Fee rate used when the caller does not supply one, in sat/byte.
pub const DEFAULT_FEE_RATE: u64 = 2;

// --- Transaction size model (legacy P2PKH) ---

/// Version + locktime + input/output count varints.
pub const TX_EMPTY_SIZE: u64 = 4 + 1 + 1 + 4;

/// Outpoint + sequence + script length prefix.
pub const TX_INPUT_BASE: u64 = 32 + 4 + 1 + 4;

/// Worst-case P2PKH scriptSig: DER signature + sighash byte + compressed key.
pub const TX_INPUT_PUBKEYHASH: u64 = 107;

/// Value + script length prefix.
pub const TX_OUTPUT_BASE: u64 = 8 + 1;

/// P2PKH scriptPubKey.
pub const TX_OUTPUT_PUBKEYHASH: u64 = 25;

/// Estimated size of one signed P2PKH input.
pub const INPUT_SIZE: u64 = TX_INPUT_BASE + TX_INPUT_PUBKEYHASH;

/// Size of one P2PKH output.
pub const OUTPUT_SIZE: u64 = TX_OUTPUT_BASE + TX_OUTPUT_PUBKEYHASH;

/// Dust threshold at a given fee rate: an output worth less than the cost of
/// spending it later is not worth creating.
pub fn dust_threshold(fee_rate: u64) -> u64 {
    INPUT_SIZE.saturating_mul(fee_rate)
}
