//! Wallet composition: login, restore, refresh and send.
//!
//! The [`Wallet`] struct ties a data provider and a persistent store to the
//! engine configuration. It hands out [`WalletSession`]s on login or
//! restore and drives every later operation against one.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use brook_core::traits::{DataProvider, KeyValueStore};
use brook_core::types::{AddressLookup, AddressRecord, Balance, Branch, BranchKind, BroadcastReceipt};
use brook_store::MemoryStore;

use crate::broadcast;
use crate::builder::{SignedTransaction, TransactionBuilder, parse_address};
use crate::config::EngineConfig;
use crate::discovery::{Discovery, next_address};
use crate::error::WalletError;
use crate::keys::KeyTree;
use crate::mnemonic::MnemonicSeed;
use crate::session::WalletSession;
use crate::store::WalletStore;
use crate::utxo::list_utxos;

/// HD wallet engine bound to a provider and a store.
pub struct Wallet {
    provider: Arc<dyn DataProvider>,
    store: WalletStore,
    config: EngineConfig,
}

impl Wallet {
    pub fn new(provider: Arc<dyn DataProvider>, store: Arc<dyn KeyValueStore>, config: EngineConfig) -> Self {
        Self {
            provider,
            store: WalletStore::new(store),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &WalletStore {
        &self.store
    }

    /// A fresh 12-word recovery phrase. Nothing is persisted until login.
    pub fn create_mnemonic() -> Result<MnemonicSeed, WalletError> {
        MnemonicSeed::generate()
    }

    /// Validate the phrase, discover both branches, publish the active
    /// addresses and aggregate UTXOs.
    ///
    /// Discovery runs against a staging store. Nothing reaches the real
    /// store until every step has succeeded; then a stored wallet for a
    /// different phrase is wiped, the branches and active addresses are
    /// written, and the mnemonic goes last.
    #[instrument(skip_all)]
    pub async fn login(&self, phrase: &str) -> Result<WalletSession, WalletError> {
        let mnemonic = MnemonicSeed::parse(phrase)?;
        let keys = KeyTree::from_mnemonic(&mnemonic)?;

        let stored = self.store.load_mnemonic().await?;
        let same_wallet = stored.as_deref() == Some(mnemonic.phrase());
        let staged = WalletStore::new(Arc::new(MemoryStore::new()));
        if same_wallet {
            for kind in BranchKind::ALL {
                if let Some(branch) = self.store.load_branch(kind).await? {
                    staged.save_branch(&branch).await?;
                }
            }
        }

        let discovery = Discovery::new(&keys, self.provider.as_ref(), &staged, &self.config);
        let (receiving, change) = tokio::try_join!(
            discovery.discover(BranchKind::Receiving, 0, self.config.initial_batch_size),
            discovery.discover(BranchKind::Change, 0, self.config.initial_batch_size),
        )?;

        let mut session = WalletSession::new(mnemonic, keys, receiving, change);
        for kind in BranchKind::ALL {
            let active = next_address(self.config.next_address_rule, session.branch(kind))
                .map(|r| r.address.clone());
            session.set_active_address(kind, active);
        }
        self.refresh_utxos(&mut session).await?;

        if !same_wallet {
            if stored.is_some() {
                warn!("replacing a different stored wallet");
            }
            self.store.clear().await?;
        }
        for kind in BranchKind::ALL {
            self.store.save_branch(session.branch(kind)).await?;
            if let Some(addr) = session.active_address(kind) {
                self.store.save_active(kind, addr).await?;
            }
        }
        self.store.save_mnemonic(session.mnemonic().phrase()).await?;

        info!(
            receiving = session.branch(BranchKind::Receiving).len(),
            change = session.branch(BranchKind::Change).len(),
            utxos = session.utxos().len(),
            "logged in"
        );
        Ok(session)
    }

    /// Rebuild a session from persisted state without querying the
    /// provider. Returns `None` when no wallet is stored. The UTXO set is
    /// empty until [`refresh_utxos`](Self::refresh_utxos).
    #[instrument(skip_all)]
    pub async fn restore(&self) -> Result<Option<WalletSession>, WalletError> {
        let Some(phrase) = self.store.load_mnemonic().await? else {
            return Ok(None);
        };
        let mnemonic = MnemonicSeed::parse(&phrase)?;
        let keys = KeyTree::from_mnemonic(&mnemonic)?;

        let receiving = self.load_branch_or_empty(BranchKind::Receiving).await?;
        let change = self.load_branch_or_empty(BranchKind::Change).await?;

        let mut session = WalletSession::new(mnemonic, keys, receiving, change);
        for kind in BranchKind::ALL {
            let active = match self.store.load_active(kind).await? {
                Some(addr) => Some(addr),
                None => next_address(self.config.next_address_rule, session.branch(kind))
                    .map(|r| r.address.clone()),
            };
            session.set_active_address(kind, active);
        }
        info!(
            receiving = session.branch(BranchKind::Receiving).len(),
            change = session.branch(BranchKind::Change).len(),
            "session restored"
        );
        Ok(Some(session))
    }

    /// Re-run discovery of one branch from index 0, e.g. after sends have
    /// used up the change branch.
    #[instrument(skip(self, session))]
    pub async fn rediscover(&self, session: &mut WalletSession, kind: BranchKind) -> Result<(), WalletError> {
        let discovery = Discovery::new(session.keys(), self.provider.as_ref(), &self.store, &self.config);
        let batch_size = self
            .config
            .initial_batch_size
            .max(session.branch(kind).batch_size());
        let branch = discovery.discover(kind, 0, batch_size).await?;
        session.replace_branch(branch);
        self.publish_active(session, kind).await
    }

    /// Re-aggregate UTXOs over the session's known addresses.
    #[instrument(skip_all)]
    pub async fn refresh_utxos(&self, session: &mut WalletSession) -> Result<Balance, WalletError> {
        let mut owners: Vec<&AddressRecord> = session.branch(BranchKind::Receiving).records().collect();
        if self.config.spend_change_outputs {
            owners.extend(session.branch(BranchKind::Change).records());
        }
        let utxos = list_utxos(self.provider.as_ref(), &owners, self.config.max_concurrent_queries).await?;
        session.set_utxos(utxos);
        let balance = session.balance();
        info!(
            confirmed = balance.confirmed,
            unconfirmed = balance.unconfirmed,
            "utxos refreshed"
        );
        Ok(balance)
    }

    /// Check that `address` is a testnet address the provider accepts.
    pub async fn validate_recipient(&self, address: &str) -> Result<(), WalletError> {
        parse_address(address)?;
        match self.provider.address_info(address).await? {
            AddressLookup::Found(_) => Ok(()),
            AddressLookup::Error { error } => Err(WalletError::InvalidAddress(format!("{address}: {error}"))),
        }
    }

    /// Validate, select and sign a payment without broadcasting it.
    pub async fn prepare_send(
        &self,
        session: &WalletSession,
        recipient: &str,
        amount: u64,
        fee_rate: Option<u64>,
    ) -> Result<SignedTransaction, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount("amount must be non-zero".into()));
        }
        self.validate_recipient(recipient).await?;

        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient, amount)
            .set_fee_rate(fee_rate.unwrap_or(self.config.default_fee_rate))
            .build(session.utxos(), session.active_change_address())?;
        TransactionBuilder::sign(unsigned, session.keys())
    }

    /// Pay `amount` satoshis to `recipient`, broadcast, and advance the
    /// change address.
    #[instrument(skip(self, session))]
    pub async fn send(
        &self,
        session: &mut WalletSession,
        recipient: &str,
        amount: u64,
        fee_rate: Option<u64>,
    ) -> Result<BroadcastReceipt, WalletError> {
        let signed = self.prepare_send(session, recipient, amount, fee_rate).await?;
        broadcast::broadcast(
            self.provider.as_ref(),
            &self.store,
            session,
            self.config.next_address_rule,
            signed,
        )
        .await
    }

    /// Remove every persisted wallet key.
    pub async fn logout(&self) -> Result<(), WalletError> {
        self.store.clear().await?;
        info!("wallet wiped");
        Ok(())
    }

    async fn load_branch_or_empty(&self, kind: BranchKind) -> Result<Branch, WalletError> {
        Ok(self
            .store
            .load_branch(kind)
            .await?
            .unwrap_or_else(|| Branch::new(kind, self.config.initial_batch_size)))
    }

    async fn publish_active(&self, session: &mut WalletSession, kind: BranchKind) -> Result<(), WalletError> {
        let active = next_address(self.config.next_address_rule, session.branch(kind)).map(|r| r.address.clone());
        if let Some(addr) = &active {
            self.store.save_active(kind, addr).await?;
        }
        session.set_active_address(kind, active);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NextAddressRule;
    use crate::testing::{ABANDON_ABOUT, MockProvider, MockStore, address_at, test_tree, txid};
    use brook_core::types::StoreKey;

    struct Fixture {
        provider: Arc<MockProvider>,
        raw: Arc<MockStore>,
        wallet: Wallet,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let provider = Arc::new(MockProvider::new());
        let raw = Arc::new(MockStore::new());
        let wallet = Wallet::new(provider.clone(), raw.clone(), config);
        Fixture { provider, raw, wallet }
    }

    #[tokio::test]
    async fn login_fresh_wallet() {
        let f = fixture(EngineConfig::default());
        let session = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        let tree = test_tree();
        assert_eq!(
            session.active_receiving_address(),
            Some(address_at(&tree, BranchKind::Receiving, 0).as_str())
        );
        assert_eq!(
            session.active_change_address(),
            Some(address_at(&tree, BranchKind::Change, 0).as_str())
        );
        assert!(f.raw.raw(StoreKey::Mnemonic).is_some());
        assert!(f.raw.raw(StoreKey::ActiveReceivingAddress).is_some());
        // 10 receiving + 10 change usage queries.
        assert_eq!(f.provider.info_calls().len(), 20);
    }

    #[tokio::test]
    async fn login_aggregates_receiving_utxos() {
        let f = fixture(EngineConfig::default());
        let tree = test_tree();
        f.provider.use_range(&tree, BranchKind::Receiving, 0, 2);
        f.provider
            .add_utxo(&address_at(&tree, BranchKind::Receiving, 1), txid(9), 0, 50_000, true);
        f.provider
            .add_utxo(&address_at(&tree, BranchKind::Change, 0), txid(8), 0, 70_000, true);

        let session = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        assert_eq!(session.utxos().len(), 1);
        assert_eq!(session.utxos()[0].derive_path, "m/44'/1'/0'/0/1");
        assert_eq!(session.balance().confirmed, 50_000);
    }

    #[tokio::test]
    async fn change_outputs_spendable_when_enabled() {
        let f = fixture(EngineConfig {
            spend_change_outputs: true,
            ..EngineConfig::default()
        });
        let tree = test_tree();
        f.provider
            .add_utxo(&address_at(&tree, BranchKind::Change, 0), txid(8), 0, 70_000, true);
        let session = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        assert_eq!(session.balance().confirmed, 70_000);
    }

    #[tokio::test]
    async fn invalid_mnemonic_touches_nothing() {
        let f = fixture(EngineConfig::default());
        let err = f.wallet.login("abandon abandon").await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidMnemonic(_)));
        assert!(f.provider.info_calls().is_empty());
        assert!(f.raw.writes().is_empty());
    }

    #[tokio::test]
    async fn failed_login_does_not_store_mnemonic() {
        let f = fixture(EngineConfig::default());
        f.provider.fail_address(&address_at(&test_tree(), BranchKind::Change, 3));
        assert!(f.wallet.login(ABANDON_ABOUT).await.is_err());
        assert!(f.raw.raw(StoreKey::Mnemonic).is_none());
        assert!(f.wallet.restore().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restore_matches_login_without_queries() {
        let f = fixture(EngineConfig::default());
        let tree = test_tree();
        f.provider.use_range(&tree, BranchKind::Receiving, 0, 3);
        let session = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        let calls = f.provider.info_calls().len();

        let restored = f.wallet.restore().await.unwrap().unwrap();
        assert_eq!(f.provider.info_calls().len(), calls);
        assert_eq!(restored.active_receiving_address(), session.active_receiving_address());
        assert_eq!(restored.active_change_address(), session.active_change_address());
        assert_eq!(
            restored.branch(BranchKind::Receiving),
            session.branch(BranchKind::Receiving)
        );
        assert!(restored.utxos().is_empty());
    }

    #[tokio::test]
    async fn send_end_to_end() {
        let f = fixture(EngineConfig::default());
        let tree = test_tree();
        f.provider.use_range(&tree, BranchKind::Receiving, 0, 1);
        f.provider
            .add_utxo(&address_at(&tree, BranchKind::Receiving, 0), txid(1), 0, 50_000, true);
        let mut session = f.wallet.login(ABANDON_ABOUT).await.unwrap();

        let to = address_at(&tree, BranchKind::Receiving, 12);
        let receipt = f.wallet.send(&mut session, &to, 30_000, None).await.unwrap();
        assert_eq!(receipt.fee, 452);
        assert_eq!(
            receipt.change_address,
            Some(address_at(&tree, BranchKind::Change, 0))
        );
        assert_eq!(
            session.active_change_address(),
            Some(address_at(&tree, BranchKind::Change, 1).as_str())
        );
        assert!(session.utxos().is_empty());
        assert_eq!(f.provider.broadcasts().len(), 1);
    }

    #[tokio::test]
    async fn send_succeeds_when_store_turns_read_only() {
        let f = fixture(EngineConfig::default());
        let tree = test_tree();
        f.provider.use_range(&tree, BranchKind::Receiving, 0, 1);
        f.provider
            .add_utxo(&address_at(&tree, BranchKind::Receiving, 0), txid(1), 0, 50_000, true);
        let mut session = f.wallet.login(ABANDON_ABOUT).await.unwrap();

        f.raw.fail_writes(true);
        let to = address_at(&tree, BranchKind::Receiving, 12);
        let receipt = f.wallet.send(&mut session, &to, 30_000, None).await.unwrap();
        assert!(!receipt.persisted);
        assert_eq!(f.provider.broadcasts().len(), 1);
        assert!(session.utxos().is_empty());
        assert_eq!(
            session.active_change_address(),
            Some(address_at(&tree, BranchKind::Change, 1).as_str())
        );
    }

    #[tokio::test]
    async fn send_rejects_zero_amount() {
        let f = fixture(EngineConfig::default());
        let mut session = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        let to = address_at(&test_tree(), BranchKind::Receiving, 12);
        let err = f.wallet.send(&mut session, &to, 0, None).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn send_rejects_provider_refused_recipient() {
        let f = fixture(EngineConfig::default());
        let mut session = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        let to = address_at(&test_tree(), BranchKind::Receiving, 12);
        f.provider.reject_address(&to, "Invalid Bitcoin address");
        let err = f.wallet.send(&mut session, &to, 1_000, None).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidAddress);
    }

    #[tokio::test]
    async fn send_without_funds_is_insufficient() {
        let f = fixture(EngineConfig::default());
        let mut session = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        let to = address_at(&test_tree(), BranchKind::Receiving, 12);
        let err = f.wallet.send(&mut session, &to, 1_000, None).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        assert!(f.provider.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn rediscover_after_change_exhausted() {
        let f = fixture(EngineConfig {
            initial_batch_size: 2,
            next_address_rule: NextAddressRule::LowestUnused,
            ..EngineConfig::default()
        });
        let tree = test_tree();
        f.provider.use_range(&tree, BranchKind::Change, 0, 1);
        let mut session = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        assert_eq!(
            session.active_change_address(),
            Some(address_at(&tree, BranchKind::Change, 1).as_str())
        );

        f.provider.use_range(&tree, BranchKind::Change, 1, 2);
        f.wallet.rediscover(&mut session, BranchKind::Change).await.unwrap();
        assert_eq!(session.branch(BranchKind::Change).batch_size(), 12);
        assert_eq!(
            session.active_change_address(),
            Some(address_at(&tree, BranchKind::Change, 2).as_str())
        );
    }

    #[tokio::test]
    async fn login_with_other_phrase_wipes_previous_state() {
        let f = fixture(EngineConfig::default());
        f.wallet.login(ABANDON_ABOUT).await.unwrap();
        let other = Wallet::create_mnemonic().unwrap();
        let session = f.wallet.login(other.phrase()).await.unwrap();
        assert_ne!(
            session.active_receiving_address(),
            Some(address_at(&test_tree(), BranchKind::Receiving, 0).as_str())
        );
        assert_eq!(f.raw.raw(StoreKey::Mnemonic).as_deref(), Some(other.phrase()));
    }

    #[tokio::test]
    async fn failed_login_with_other_phrase_keeps_stored_wallet() {
        let f = fixture(EngineConfig::default());
        let tree = test_tree();
        f.provider.use_range(&tree, BranchKind::Receiving, 0, 2);
        let first = f.wallet.login(ABANDON_ABOUT).await.unwrap();
        let receiving_map = f.raw.raw(StoreKey::ReceivingAddressMap);

        let other = Wallet::create_mnemonic().unwrap();
        let other_tree = KeyTree::from_mnemonic(&other).unwrap();
        f.provider
            .fail_address(&address_at(&other_tree, BranchKind::Receiving, 0));
        let err = f.wallet.login(other.phrase()).await.unwrap_err();
        assert!(matches!(err, WalletError::Provider(_)));

        assert_eq!(f.raw.raw(StoreKey::Mnemonic).as_deref(), Some(first.mnemonic().phrase()));
        assert_eq!(f.raw.raw(StoreKey::ReceivingAddressMap), receiving_map);
        let restored = f.wallet.restore().await.unwrap().unwrap();
        assert_eq!(restored.active_receiving_address(), first.active_receiving_address());
    }

    #[tokio::test]
    async fn failed_relogin_keeps_persisted_usage() {
        let f = fixture(EngineConfig::default());
        let tree = test_tree();
        f.provider.use_range(&tree, BranchKind::Change, 0, 3);
        f.wallet.login(ABANDON_ABOUT).await.unwrap();
        let before = f.wallet.store().load_branch(BranchKind::Change).await.unwrap();

        f.provider.fail_address(&address_at(&tree, BranchKind::Receiving, 5));
        assert!(f.wallet.login(ABANDON_ABOUT).await.is_err());
        assert_eq!(
            f.wallet.store().load_branch(BranchKind::Change).await.unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn logout_wipes_store() {
        let f = fixture(EngineConfig::default());
        f.wallet.login(ABANDON_ABOUT).await.unwrap();
        f.wallet.logout().await.unwrap();
        for key in StoreKey::ALL {
            assert!(f.raw.raw(key).is_none());
        }
        assert!(f.wallet.restore().await.unwrap().is_none());
    }
}
