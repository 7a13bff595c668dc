//! Wallet error types.

use brook_core::error::{ProviderError, StoreError};
use thiserror::Error;

/// Errors that can occur in wallet operations.
///
/// Every variant is terminal for the action that raised it; the engine
/// never retries on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Phrase failed wordlist or checksum validation.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Data provider unreachable or returned something unusable.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No subset of confirmed outputs covers the targets plus fee.
    #[error("insufficient funds: have {available}, need {needed} (fee {fee})")]
    InsufficientFunds {
        /// Sum of confirmed UTXO values in satoshis.
        available: u64,
        /// Sum of target values plus the estimated fee.
        needed: u64,
        /// Fee estimated for the failed selection.
        fee: u64,
    },

    /// A selected input is not confirmed.
    #[error("input {txid}:{vout} is unconfirmed")]
    UnconfirmedInput {
        txid: String,
        vout: u32,
    },

    /// Provider refused the transaction. Carries its message verbatim.
    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    /// Recipient is not a usable testnet address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Fee rate is zero or otherwise unusable.
    #[error("invalid fee rate: {0}")]
    InvalidFeeRate(String),

    /// Key derivation failure.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    /// Persistent store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Selection produced a change output but no change address is known.
    #[error("no change address available")]
    NoChangeAddress,

    /// Discovery kept finding fully used batches past the configured cap.
    #[error("gap limit exceeded: batch size {batch_size} over maximum {max}")]
    GapLimitExceeded { batch_size: u32, max: u32 },

    /// Transaction build error.
    #[error("build error: {0}")]
    Build(String),

    /// Serialization error.
    #[error("serialization: {0}")]
    Serialization(String),
}

/// Stable classification of [`WalletError`] for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidMnemonic,
    Provider,
    InsufficientFunds,
    UnconfirmedInput,
    Broadcast,
    InvalidAddress,
    InvalidAmount,
    Internal,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMnemonic(_) => ErrorKind::InvalidMnemonic,
            Self::Provider(_) => ErrorKind::Provider,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::UnconfirmedInput { .. } => ErrorKind::UnconfirmedInput,
            Self::Broadcast(_) => ErrorKind::Broadcast,
            Self::InvalidAddress(_) => ErrorKind::InvalidAddress,
            Self::InvalidAmount(_) | Self::InvalidFeeRate(_) => ErrorKind::InvalidAmount,
            Self::KeyDerivation(_)
            | Self::Store(_)
            | Self::NoChangeAddress
            | Self::GapLimitExceeded { .. }
            | Self::Build(_)
            | Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds {
            available: 100,
            needed: 500,
            fee: 452,
        };
        assert_eq!(e.to_string(), "insufficient funds: have 100, need 500 (fee 452)");
    }

    #[test]
    fn display_unconfirmed_input() {
        let e = WalletError::UnconfirmedInput {
            txid: "ab".into(),
            vout: 1,
        };
        assert_eq!(e.to_string(), "input ab:1 is unconfirmed");
    }

    #[test]
    fn provider_error_is_transparent() {
        let e: WalletError = ProviderError::Transport("connection refused".into()).into();
        assert_eq!(e.to_string(), "transport: connection refused");
        assert_eq!(e.kind(), ErrorKind::Provider);
    }

    #[test]
    fn from_store_error() {
        let e: WalletError = StoreError::Io("disk full".into()).into();
        assert_eq!(e, WalletError::Store(StoreError::Io("disk full".into())));
        assert_eq!(e.kind(), ErrorKind::Internal);
    }

    #[test]
    fn kinds_are_distinct_for_user_facing_errors() {
        let errors = [
            WalletError::InvalidMnemonic("x".into()),
            WalletError::Provider(ProviderError::Decode("x".into())),
            WalletError::InsufficientFunds {
                available: 0,
                needed: 1,
                fee: 0,
            },
            WalletError::UnconfirmedInput {
                txid: "x".into(),
                vout: 0,
            },
            WalletError::Broadcast("x".into()),
            WalletError::InvalidAddress("x".into()),
        ];
        let kinds: std::collections::HashSet<ErrorKind> = errors.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds.len(), errors.len());
    }
}
