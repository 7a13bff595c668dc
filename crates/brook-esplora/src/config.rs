//! Esplora client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Blockstream's public testnet Esplora instance.
pub const TESTNET_URL: &str = "https://blockstream.info/testnet/api";

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraConfig {
    /// API root, without trailing slash.
    pub base_url: String,
    pub timeout_secs: u64,
}

impl EsploraConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EsploraConfig {
    fn default() -> Self {
        Self {
            base_url: TESTNET_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}
