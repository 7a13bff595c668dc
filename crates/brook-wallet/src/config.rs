//! Engine configuration.

use serde::{Deserialize, Serialize};

use brook_core::constants::{
    BATCH_INCREMENT, DEFAULT_BATCH_SIZE, DEFAULT_FEE_RATE, DEFAULT_MAX_CONCURRENT_QUERIES,
    MAX_BATCH_SIZE,
};

/// How the active address of a branch is picked from its records.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NextAddressRule {
    /// Lowest-indexed unused record.
    #[default]
    LowestUnused,
    /// First record whose index equals its position in index order and is
    /// unused; falls back to the first record when nothing matches.
    PositionalMatch,
}

/// Tunables for discovery, aggregation and sending.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Addresses scanned by the first discovery pass of a branch.
    pub initial_batch_size: u32,
    /// Growth applied when a whole batch comes back used.
    pub batch_increment: u32,
    /// Discovery gives up once the batch would grow past this.
    pub max_batch_size: u32,
    /// In-flight provider requests per fan-out.
    pub max_concurrent_queries: usize,
    /// Fee rate in sat/byte used when the caller does not give one.
    pub default_fee_rate: u64,
    pub next_address_rule: NextAddressRule,
    /// Aggregate UTXOs of change addresses too, not only receiving ones.
    pub spend_change_outputs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: DEFAULT_BATCH_SIZE,
            batch_increment: BATCH_INCREMENT,
            max_batch_size: MAX_BATCH_SIZE,
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
            default_fee_rate: DEFAULT_FEE_RATE,
            next_address_rule: NextAddressRule::default(),
            spend_change_outputs: false,
        }
    }
}
