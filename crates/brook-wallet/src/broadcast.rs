//! Broadcast and post-broadcast state advancement.
//!
//! On acceptance the session is updated first: the change address that
//! received the change output is marked used, the active change address
//! moves to the next one under the configured rule, and the spent inputs
//! are dropped. The change branch and active address are persisted after
//! that. A failed write is logged and flagged on the receipt; it never
//! turns an accepted transaction into an error. When the branch has no
//! unused address left, the active change address is kept and nothing
//! further happens until discovery is re-run. On rejection nothing
//! changes.

use tracing::{info, instrument, warn};

use brook_core::traits::DataProvider;
use brook_core::types::{BranchKind, BroadcastReceipt};

use crate::builder::SignedTransaction;
use crate::config::NextAddressRule;
use crate::discovery::next_address;
use crate::error::WalletError;
use crate::session::WalletSession;
use crate::store::WalletStore;

/// Submit a signed transaction. A rejection carries the provider's message.
pub async fn submit(provider: &dyn DataProvider, signed: &SignedTransaction) -> Result<(), WalletError> {
    let response = provider.broadcast(&signed.hex).await?;
    if let Some(message) = response.rejection() {
        return Err(WalletError::Broadcast(message));
    }
    let txid = signed.txid().to_string();
    if let Some(reported) = response.txid.as_deref() {
        if !reported.is_empty() && reported != txid {
            warn!(%txid, reported, "provider reported a different txid");
        }
    }
    Ok(())
}

/// Mark `change_address` used in the session and move the active change
/// address on. Nothing is persisted here.
///
/// Returns the active change address afterwards.
pub fn advance_change(
    session: &mut WalletSession,
    rule: NextAddressRule,
    change_address: &str,
) -> Option<String> {
    let mut branch = session.branch(BranchKind::Change).clone();
    if !branch.mark_used(change_address) {
        warn!(address = change_address, "change address not in change branch");
        return session.active_change_address().map(str::to_string);
    }

    let next = next_address(rule, &branch)
        .filter(|r| !r.is_used)
        .map(|r| r.address.clone());
    session.replace_branch(branch);
    match next {
        Some(addr) => {
            session.set_active_address(BranchKind::Change, Some(addr.clone()));
            info!(from = change_address, to = %addr, "change address advanced");
            Some(addr)
        }
        None => {
            warn!(
                address = change_address,
                "change branch exhausted; rediscover before the next send"
            );
            session.active_change_address().map(str::to_string)
        }
    }
}

/// Write the session's change branch and active change address.
pub async fn persist_change(store: &WalletStore, session: &WalletSession) -> Result<(), WalletError> {
    store.save_branch(session.branch(BranchKind::Change)).await?;
    if let Some(addr) = session.active_change_address() {
        store.save_active(BranchKind::Change, addr).await?;
    }
    Ok(())
}

/// Broadcast `signed` and, if accepted, advance session and store state.
///
/// Once the provider has accepted the transaction this always returns the
/// receipt.
#[instrument(skip_all, fields(txid = %signed.txid(), fee = signed.fee))]
pub async fn broadcast(
    provider: &dyn DataProvider,
    store: &WalletStore,
    session: &mut WalletSession,
    rule: NextAddressRule,
    signed: SignedTransaction,
) -> Result<BroadcastReceipt, WalletError> {
    submit(provider, &signed).await?;
    info!("transaction accepted");

    let next_change_address = match &signed.change_address {
        Some(addr) => advance_change(session, rule, addr),
        None => session.active_change_address().map(str::to_string),
    };
    session.prune_spent(&signed.spent_outpoints());

    let persisted = match &signed.change_address {
        Some(_) => match persist_change(store, session).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "transaction accepted but change state was not persisted");
                false
            }
        },
        None => true,
    };

    Ok(BroadcastReceipt {
        txid: signed.txid(),
        fee: signed.fee,
        change_address: signed.change_address,
        next_change_address,
        persisted,
    })
}
