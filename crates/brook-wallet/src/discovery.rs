//! Gap-limit address discovery.
//!
//! A pass derives `batch_size` consecutive addresses of a branch, asks the
//! provider about all of them concurrently, and classifies each as used or
//! unused once every answer is in. The classified branch is persisted. If
//! the whole batch is used the batch grows by the configured increment and
//! the pass is re-run from the same start index, re-querying the addresses
//! already seen.

use futures::{StreamExt, stream};
use tracing::{debug, info, instrument};

use brook_core::error::ProviderError;
use brook_core::traits::DataProvider;
use brook_core::types::{AddressLookup, AddressRecord, Branch, BranchKind};

use crate::config::{EngineConfig, NextAddressRule};
use crate::error::WalletError;
use crate::keys::KeyTree;
use crate::store::WalletStore;

/// Discovery over one key tree, provider and store.
pub struct Discovery<'a> {
    keys: &'a KeyTree,
    provider: &'a dyn DataProvider,
    store: &'a WalletStore,
    config: &'a EngineConfig,
}

impl<'a> Discovery<'a> {
    pub fn new(
        keys: &'a KeyTree,
        provider: &'a dyn DataProvider,
        store: &'a WalletStore,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            keys,
            provider,
            store,
            config,
        }
    }

    /// Discover a branch starting at `start_index` with an initial batch of
    /// `batch_size` addresses.
    ///
    /// Usage flags already persisted for the branch are carried over, and
    /// the persisted batch size is never shrunk. Persisted records outside
    /// the scanned window are kept as they are.
    ///
    /// Any provider failure aborts the call before anything is persisted
    /// for that pass. Growing past `max_batch_size` persists the last pass
    /// and fails with [`WalletError::GapLimitExceeded`].
    #[instrument(skip(self), fields(branch = %kind))]
    pub async fn discover(
        &self,
        kind: BranchKind,
        start_index: u32,
        batch_size: u32,
    ) -> Result<Branch, WalletError> {
        let previous = self.store.load_branch(kind).await?;
        let mut batch_size = batch_size.max(1);
        if let Some(prev) = &previous {
            batch_size = batch_size.max(prev.batch_size());
        }

        loop {
            let mut branch = Branch::new(kind, batch_size);
            let scanned = self.classify_batch(kind, start_index, batch_size).await?;
            let batch_used = scanned.iter().all(|r| r.is_used);
            for record in scanned {
                branch.insert(record);
            }
            if let Some(prev) = &previous {
                branch.merge_usage(prev);
                let outside: Vec<AddressRecord> = prev
                    .records()
                    .filter(|r| branch.get(r.index).is_none())
                    .cloned()
                    .collect();
                for record in outside {
                    branch.insert(record);
                }
            }
            self.store.save_branch(&branch).await?;

            if !batch_used {
                info!(
                    batch_size,
                    known = branch.len(),
                    unused = branch.unused().count(),
                    "discovery complete"
                );
                return Ok(branch);
            }

            let grown = batch_size.saturating_add(self.config.batch_increment.max(1));
            if grown > self.config.max_batch_size {
                return Err(WalletError::GapLimitExceeded {
                    batch_size: grown,
                    max: self.config.max_batch_size,
                });
            }
            debug!(batch_size, grown, "batch fully used, growing");
            batch_size = grown;
        }
    }

    /// Derive and classify one batch. Returns only after every query has
    /// resolved.
    async fn classify_batch(
        &self,
        kind: BranchKind,
        start_index: u32,
        batch_size: u32,
    ) -> Result<Vec<AddressRecord>, WalletError> {
        let derived = self.keys.derive_batch(kind, start_index, batch_size)?;
        let lookups: Vec<Result<AddressLookup, ProviderError>> = stream::iter(
            derived.iter().map(|d| self.provider.address_info(&d.address)),
        )
        .buffered(self.config.max_concurrent_queries.max(1))
        .collect()
        .await;

        let mut records = Vec::with_capacity(derived.len());
        for (derived, lookup) in derived.into_iter().zip(lookups) {
            let is_used = match lookup? {
                AddressLookup::Found(info) => info.is_used(),
                AddressLookup::Error { error } => {
                    return Err(ProviderError::Rejected {
                        subject: derived.address,
                        message: error,
                    }
                    .into());
                }
            };
            records.push(AddressRecord::classify(derived, is_used));
        }
        debug!(
            start_index,
            batch_size,
            used = records.iter().filter(|r| r.is_used).count(),
            "batch classified"
        );
        Ok(records)
    }
}

/// Resolve the active address of a branch under `rule`.
///
/// `LowestUnused` returns `None` when every record is used, meaning the
/// branch must be discovered further first.
pub fn next_address(rule: NextAddressRule, branch: &Branch) -> Option<&AddressRecord> {
    match rule {
        NextAddressRule::LowestUnused => branch.unused().next(),
        NextAddressRule::PositionalMatch => {
            let sorted: Vec<&AddressRecord> = branch.records().collect();
            sorted
                .iter()
                .enumerate()
                .find(|(pos, r)| r.index as usize == *pos && !r.is_used)
                .map(|(_, r)| *r)
                .or_else(|| sorted.first().copied())
        }
    }
}
