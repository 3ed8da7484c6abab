use chia_protocol::{Bytes, Bytes32};
use chia_puzzle_types::LineageProof;
use chia_sync_store::{
    delete_coin_record, delete_coin_records_for_wallet, delete_derivations_for_wallet,
    delete_lineage_proofs_for_coin, delete_lineage_proofs_for_wallet, delete_transaction,
    delete_transactions_for_wallet, delete_wallet, fetch_derivation_by_puzzle_hash, fetch_wallets,
    insert_wallet,
    upsert_transaction, DerivationRecord, TransactionRecord, WalletType,
};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::{
    AssetPolicy, DerivationLookaheadAllocator, NewWallet, Result, StandardPolicy, StateChange,
    SyncConfig, WalletError,
};

use super::TrackerState;

/// A unit of work in progress. Everything goes through the same database
/// transaction, and the notifications are only sent if it commits.
pub(crate) struct Session<'a> {
    pub(crate) conn: &'a mut SqliteConnection,
    pub(crate) state: &'a mut TrackerState,
    pub(crate) config: &'a SyncConfig,
    pub(crate) allocator: &'a DerivationLookaheadAllocator,
    pub(crate) events: Vec<StateChange>,
}

impl Session<'_> {
    pub(crate) async fn initialize(&mut self) -> Result<()> {
        if fetch_wallets(self.conn).await?.is_empty() {
            let wallet_id =
                insert_wallet(self.conn, "Chia Wallet", WalletType::Standard, &Bytes::default())
                    .await?;
            info!(wallet_id, "created standard wallet");
        }

        *self.state = TrackerState::load(self.conn).await?;

        for asset_id in self.config.default_cats.clone() {
            self.create_wallet(NewWallet::Cat {
                asset_id,
                name: None,
            })
            .await?;
        }

        self.top_up().await
    }

    pub(crate) fn policy(&self, wallet_id: u32) -> Result<&AssetPolicy> {
        self.state
            .policies
            .get(&wallet_id)
            .ok_or(WalletError::UnknownWallet(wallet_id))
    }

    pub(crate) fn standard_policy(&self) -> Result<StandardPolicy> {
        self.state
            .policies
            .values()
            .find_map(AssetPolicy::as_standard)
            .ok_or_else(|| WalletError::Internal("missing standard wallet".to_string()))
    }

    /// Whether the puzzle hash belongs to any of the wallets.
    pub(crate) async fn is_ours(&mut self, puzzle_hash: Bytes32) -> Result<bool> {
        if self.state.interests.wallet_for_puzzle_hash(puzzle_hash).is_some() {
            return Ok(true);
        }

        Ok(fetch_derivation_by_puzzle_hash(self.conn, puzzle_hash)
            .await?
            .is_some())
    }

    pub(crate) async fn top_up(&mut self) -> Result<()> {
        self.allocator
            .create_more_puzzle_hashes(self.conn, &self.state.policies, &mut self.state.interests)
            .await?;
        Ok(())
    }

    pub(crate) async fn unused_derivation(
        &mut self,
        wallet_id: u32,
        hardened: bool,
    ) -> Result<DerivationRecord> {
        self.allocator
            .get_unused_derivation_record(
                self.conn,
                wallet_id,
                hardened,
                &self.state.policies,
                &mut self.state.interests,
            )
            .await
    }

    /// The next unhardened derivation of a wallet, for change and new addresses.
    pub(crate) async fn next_derivation(&mut self, wallet_id: u32) -> Result<DerivationRecord> {
        self.unused_derivation(wallet_id, false).await
    }

    pub(crate) async fn create_wallet(&mut self, new_wallet: NewWallet) -> Result<u32> {
        if let Some(existing) = self
            .state
            .policies
            .values()
            .find(|policy| policy.matches(&new_wallet))
        {
            return Ok(existing.wallet_id());
        }

        let policy = AssetPolicy::create(self.conn, &new_wallet).await?;
        let wallet_id = policy.wallet_id();

        for coin_id in policy.initial_coin_interests() {
            self.state
                .interests
                .add_coin_id(self.conn, coin_id, wallet_id)
                .await?;
        }

        info!(wallet_id, wallet_type = ?policy.wallet_type(), "created wallet");

        self.state.policies.insert(wallet_id, policy);
        self.top_up().await?;
        self.events.push(StateChange::WalletCreated { wallet_id });

        Ok(wallet_id)
    }

    pub(crate) async fn delete_wallet(&mut self, wallet_id: u32) -> Result<()> {
        if self.policy(wallet_id)?.wallet_type() == WalletType::Standard {
            return Err(WalletError::UnsupportedOperation(
                "deleting the standard wallet",
            ));
        }

        delete_coin_records_for_wallet(self.conn, wallet_id).await?;
        delete_transactions_for_wallet(self.conn, wallet_id).await?;
        delete_derivations_for_wallet(self.conn, wallet_id).await?;
        delete_lineage_proofs_for_wallet(self.conn, wallet_id).await?;
        self.state.interests.remove_wallet(self.conn, wallet_id).await?;
        delete_wallet(self.conn, wallet_id).await?;

        self.state.policies.shift_remove(&wallet_id);
        self.state.watches.retain(|_, watcher| *watcher != wallet_id);

        info!(wallet_id, "deleted wallet");
        self.events.push(StateChange::WalletDeleted { wallet_id });

        Ok(())
    }

    pub(crate) async fn add_transaction(&mut self, transaction: TransactionRecord) -> Result<()> {
        upsert_transaction(self.conn, &transaction).await?;

        debug!(
            transaction_id = %transaction.id,
            kind = ?transaction.kind,
            amount = transaction.amount,
            "added transaction"
        );

        self.events.push(StateChange::TransactionAdded {
            wallet_id: transaction.wallet_id,
            transaction_id: transaction.id,
        });

        Ok(())
    }

    /// Remembers the lineage of a coin this wallet created itself.
    pub(crate) async fn record_lineage(
        &mut self,
        wallet_id: u32,
        coin_id: Bytes32,
        proof: Option<LineageProof>,
    ) -> Result<()> {
        let Some(cat) = self
            .state
            .policies
            .get_mut(&wallet_id)
            .and_then(AssetPolicy::as_cat_mut)
        else {
            return Err(WalletError::UnknownWallet(wallet_id));
        };

        cat.lineage_mut().put(self.conn, coin_id, proof).await?;
        Ok(())
    }

    /// Deletes a coin along with everything derived from it. Transactions
    /// synthesized for receiving the coin share its id.
    pub(crate) async fn remove_coin(&mut self, wallet_id: u32, coin_id: Bytes32) -> Result<()> {
        delete_coin_record(self.conn, coin_id).await?;
        delete_lineage_proofs_for_coin(self.conn, coin_id).await?;
        delete_transaction(self.conn, coin_id).await?;

        if let Some(policy) = self.state.policies.get_mut(&wallet_id) {
            policy.forget_coin(coin_id);
        }

        self.events
            .push(StateChange::CoinRemoved { wallet_id, coin_id });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chia_protocol::Coin;
    use chia_puzzles::SINGLETON_LAUNCHER_HASH;

    use crate::{
        test_utils::{coin_state, derivation, test_config, test_tracker, TestPeer},
        CatPolicy, SyncConfig,
    };

    use super::*;

    #[tokio::test]
    async fn test_default_wallets() -> anyhow::Result<()> {
        let asset_id = Bytes32::new([5; 32]);
        let tracker = test_tracker(SyncConfig {
            default_cats: vec![asset_id],
            ..test_config()
        })
        .await?;

        let wallets = tracker.wallets().await?;
        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[0].name, "Chia Wallet");
        assert_eq!(wallets[0].wallet_type, WalletType::Standard);
        assert_eq!(wallets[1].name, CatPolicy::default_name(asset_id));

        // Asking for the same asset again returns the existing wallet.
        let wallet_id = tracker
            .create_wallet(NewWallet::Cat {
                asset_id,
                name: None,
            })
            .await?;
        assert_eq!(wallet_id, wallets[1].id);
        assert_eq!(tracker.wallets().await?.len(), 2);

        // Every wallet has the full lookahead.
        derivation(&tracker, wallets[1].id, 4).await?;
        derivation(&tracker, 1, 4).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_wallet() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();

        assert!(matches!(
            tracker.delete_wallet(1).await,
            Err(WalletError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            tracker.delete_wallet(9).await,
            Err(WalletError::UnknownWallet(9))
        ));

        let launcher = Coin::new(
            Bytes32::new([2; 32]),
            Bytes32::new(SINGLETON_LAUNCHER_HASH),
            1,
        );
        let launcher_id = launcher.coin_id();

        let did_wallet = tracker
            .create_wallet(NewWallet::Did { launcher_id })
            .await?;
        assert!(tracker
            .all_subscriptions()
            .await
            .coin_ids
            .contains(&launcher_id));

        // The launcher is found through the coin id the wallet watches.
        tracker
            .ingest(vec![coin_state(launcher, 5, None)], &peer, None)
            .await?;
        assert_eq!(tracker.balance(did_wallet).await?.confirmed, 1);

        tracker.delete_wallet(did_wallet).await?;
        assert_eq!(tracker.wallets().await?.len(), 1);
        assert!(!tracker
            .all_subscriptions()
            .await
            .coin_ids
            .contains(&launcher_id));
        assert!(matches!(
            tracker.balance(did_wallet).await,
            Err(WalletError::UnknownWallet(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_unused_derivations() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;

        let first = tracker.get_unused_derivation_record(1, false).await?;
        let second = tracker.get_unused_derivation_record(1, false).await?;
        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        assert_eq!(second.puzzle_hash, derivation(&tracker, 1, 1).await?.puzzle_hash);

        let hardened = tracker.get_unused_derivation_record(1, true).await?;
        assert!(hardened.hardened);
        assert_eq!(hardened.index, 2);

        let did_wallet = tracker
            .create_wallet(NewWallet::Did {
                launcher_id: Bytes32::new([3; 32]),
            })
            .await?;
        assert!(matches!(
            tracker.get_unused_derivation_record(did_wallet, false).await,
            Err(WalletError::UnsupportedOperation(_))
        ));

        Ok(())
    }
}
