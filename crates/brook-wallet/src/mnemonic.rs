//! BIP-39 mnemonic generation, normalisation and validation.

use std::fmt;

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::WalletError;

/// Entropy for a 12-word phrase.
const ENTROPY_BYTES: usize = 16;

/// A validated recovery phrase together with its 64-byte BIP-39 seed.
///
/// Both are zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MnemonicSeed {
    phrase: String,
    seed: [u8; 64],
}

impl MnemonicSeed {
    /// Validate a phrase against the English wordlist and its checksum.
    ///
    /// Whitespace is collapsed and the phrase lowercased first.
    pub fn parse(phrase: &str) -> Result<Self, WalletError> {
        let normalized = normalize_phrase(phrase);
        let mnemonic = Mnemonic::parse_in(Language::English, &normalized)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Self {
            phrase: mnemonic.to_string(),
            seed: mnemonic.to_seed(""),
        })
    }

    /// Fresh 12-word phrase from the OS RNG.
    pub fn generate() -> Result<Self, WalletError> {
        let mut entropy = [0u8; ENTROPY_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()));
        entropy.zeroize();
        let mnemonic = mnemonic?;
        Ok(Self {
            phrase: mnemonic.to_string(),
            seed: mnemonic.to_seed(""),
        })
    }

    /// The normalized phrase. Handle with care.
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// The binary seed. Handle with care.
    pub fn seed(&self) -> &[u8; 64] {
        &self.seed
    }

    pub fn word_count(&self) -> usize {
        self.phrase.split(' ').count()
    }
}

impl fmt::Debug for MnemonicSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MnemonicSeed")
            .field("phrase", &"[REDACTED]")
            .field("words", &self.word_count())
            .finish()
    }
}

/// Collapse runs of whitespace to single spaces and lowercase.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
