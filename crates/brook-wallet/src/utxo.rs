//! UTXO aggregation across known wallet addresses.

use std::collections::HashSet;

use futures::{StreamExt, stream};
use tracing::{debug, instrument};

use brook_core::error::ProviderError;
use brook_core::traits::DataProvider;
use brook_core::types::{AddressRecord, ProviderUtxo, Utxo};

use crate::error::WalletError;

/// Query the provider once per address and merge the results.
///
/// Unconfirmed outputs are kept; coin selection filters them. The call
/// either returns the complete list or fails with the first provider error
/// in address order. Outputs reported under more than one address are kept
/// once.
#[instrument(skip_all, fields(addresses = addresses.len()))]
pub async fn list_utxos(
    provider: &dyn DataProvider,
    addresses: &[&AddressRecord],
    max_concurrent: usize,
) -> Result<Vec<Utxo>, WalletError> {
    let responses: Vec<Result<Vec<ProviderUtxo>, ProviderError>> =
        stream::iter(addresses.iter().map(|r| provider.utxos(&r.address)))
            .buffered(max_concurrent.max(1))
            .collect()
            .await;

    let mut seen = HashSet::new();
    let mut utxos = Vec::new();
    for (owner, response) in addresses.iter().zip(responses) {
        for entry in response? {
            let utxo = Utxo::from_provider(entry, owner);
            if seen.insert(utxo.outpoint()) {
                utxos.push(utxo);
            }
        }
    }
    debug!(
        count = utxos.len(),
        confirmed = utxos.iter().filter(|u| u.confirmed).count(),
        "utxos aggregated"
    );
    Ok(utxos)
}

/// Outputs eligible for coin selection.
pub fn spendable(utxos: &[Utxo]) -> impl Iterator<Item = &Utxo> {
    utxos.iter().filter(|u| u.confirmed)
}
