use chia_protocol::{Bytes32, Coin, CoinSpend, CoinState};
use chia_puzzles::SINGLETON_LAUNCHER_HASH;
use chia_sha2::Sha256;
use chia_sync_driver::{cat_puzzle_hash, child_coins, CatParent, ChildCoin, DriverError, PoolLaunch};
use chia_sync_store::{
    fetch_coin_record, fetch_coin_records_by_parent, fetch_derivation_by_puzzle_hash,
    fetch_transactions_with_coin, is_derivation_used, set_coin_spent, set_transaction_confirmed,
    set_used_up_to, upsert_coin_record, CoinRecord, TransactionRecord, TransactionType,
    WalletType,
};
use clvmr::Allocator;
use tracing::{debug, info, instrument, warn};

use crate::{policy::sum_amounts, NewWallet, Result, StateChange, WalletError, WalletPeer};

use super::{timestamp_for_height, Session};

/// Outgoing transactions which are only known from a spend seen on chain
/// get their id by hashing this prefix with the id of the spent coin.
const OBSERVED_SPEND_PREFIX: &[u8] = b"observed_spend";

fn observed_spend_id(coin_id: Bytes32) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(OBSERVED_SPEND_PREFIX);
    hasher.update(coin_id);
    Bytes32::new(hasher.finalize())
}

fn parse_cat_children(
    coin_spend: &CoinSpend,
) -> std::result::Result<Option<(CatParent, Vec<ChildCoin>)>, DriverError> {
    let mut allocator = Allocator::new();

    let Some(cat) = CatParent::parse(&mut allocator, coin_spend)? else {
        return Ok(None);
    };

    Ok(Some((cat, child_coins(&mut allocator, coin_spend)?)))
}

impl Session<'_> {
    #[instrument(skip_all, fields(count = coin_states.len()))]
    pub(crate) async fn ingest<P: WalletPeer>(
        &mut self,
        peer: &P,
        coin_states: Vec<CoinState>,
        fork_height: Option<u32>,
    ) -> Result<()> {
        for coin_state in coin_states {
            let mut queue = vec![coin_state];
            let mut follow_ups = 0;

            while let Some(coin_state) = queue.pop() {
                let discovered = self.apply_coin_state(peer, coin_state, fork_height).await?;

                if discovered.is_empty() {
                    continue;
                }

                if follow_ups >= self.config.max_singleton_depth {
                    warn!(
                        limit = self.config.max_singleton_depth,
                        "stopped following singleton, a later update will continue"
                    );
                    continue;
                }

                follow_ups += 1;
                queue.extend(discovered.into_iter().rev());
            }
        }

        self.repair_lineage(peer).await?;
        self.top_up().await
    }

    /// Applies a single coin state, returning the states of coins which were
    /// discovered along the way and need to be applied next.
    async fn apply_coin_state<P: WalletPeer>(
        &mut self,
        peer: &P,
        coin_state: CoinState,
        fork_height: Option<u32>,
    ) -> Result<Vec<CoinState>> {
        let coin = coin_state.coin;
        let coin_id = coin.coin_id();
        let local = fetch_coin_record(self.conn, coin_id).await?;

        if local
            .as_ref()
            .is_some_and(|record| record.matches_state(&coin_state))
        {
            return Ok(Vec::new());
        }

        let Some(created_height) = coin_state.created_height else {
            if let Some(record) = local {
                debug!(%coin_id, "coin is no longer on chain");
                self.remove_coin(record.wallet_id, coin_id).await?;
            }
            return Ok(Vec::new());
        };

        let children = match coin_state.spent_height {
            Some(_) => match peer.fetch_children(coin_id, fork_height).await {
                Ok(children) => children,
                Err(error) => {
                    warn!(%error, %coin_id, "failed to fetch children, skipping coin state");
                    return Ok(Vec::new());
                }
            },
            None => Vec::new(),
        };

        if local.is_none() {
            if let Some(&wallet_id) = self.state.watches.get(&coin.puzzle_hash) {
                self.events.push(StateChange::PuzzleHashCreated {
                    wallet_id,
                    puzzle_hash: coin.puzzle_hash,
                    coin_id,
                });
            }
        }

        let wallet_id = match &local {
            Some(record) => record.wallet_id,
            None => match self.resolve_wallet(peer, &coin, created_height).await? {
                Some(wallet_id) => wallet_id,
                None => return Ok(Vec::new()),
            },
        };

        if !self.state.policies.contains_key(&wallet_id) {
            warn!(%coin_id, wallet_id, "coin belongs to a wallet which no longer exists");
            return Ok(Vec::new());
        }

        if let Some(derivation) = fetch_derivation_by_puzzle_hash(self.conn, coin.puzzle_hash).await?
        {
            if !is_derivation_used(self.conn, coin.puzzle_hash).await? {
                set_used_up_to(self.conn, derivation.index).await?;
                self.top_up().await?;
            }
        }

        match (local, coin_state.spent_height) {
            (None, spent_height) => {
                self.add_coin(peer, coin, created_height, wallet_id).await?;

                if let Some(spent_height) = spent_height {
                    self.spend_coin(peer, coin, spent_height, wallet_id, &children)
                        .await?;
                }
            }
            (Some(record), None) => {
                debug!(%coin_id, created_height, "coin was reconfirmed or unspent");
                upsert_coin_record(
                    self.conn,
                    &CoinRecord {
                        confirmed_height: created_height,
                        spent_height: 0,
                        ..record
                    },
                )
                .await?;
            }
            (Some(record), Some(spent_height)) => {
                if record.confirmed_height != created_height {
                    upsert_coin_record(
                        self.conn,
                        &CoinRecord {
                            confirmed_height: created_height,
                            ..record.clone()
                        },
                    )
                    .await?;
                }

                if record.spent_height != spent_height {
                    self.spend_coin(peer, coin, spent_height, wallet_id, &children)
                        .await?;
                }
            }
        }

        let mut discovered = Vec::new();

        if coin_state.spent_height.is_some() {
            discovered.extend(self.detect_pool_launch(peer, &children).await?);

            let successor = self.policy(wallet_id)?.singleton_successor(&children);

            if let Some(next) = successor {
                self.state
                    .interests
                    .add_coin_id(self.conn, next.coin.coin_id(), wallet_id)
                    .await?;
                discovered.push(next);
            }
        }

        Ok(discovered)
    }

    /// Finds the wallet a new coin belongs to, if any.
    async fn resolve_wallet<P: WalletPeer>(
        &mut self,
        peer: &P,
        coin: &Coin,
        created_height: u32,
    ) -> Result<Option<u32>> {
        if let Some(derivation) = fetch_derivation_by_puzzle_hash(self.conn, coin.puzzle_hash).await?
        {
            return Ok(Some(derivation.wallet_id));
        }

        if let Some(wallet_id) = self.state.interests.wallet_for_puzzle_hash(coin.puzzle_hash) {
            return Ok(Some(wallet_id));
        }

        if let Some(wallet_id) = self.state.interests.wallet_for_coin_id(coin.coin_id()) {
            return Ok(Some(wallet_id));
        }

        self.classify_from_parent(peer, coin, created_height).await
    }

    /// Recognizes a CAT sent to one of our puzzle hashes, by looking at the
    /// spend that created it. The coin is hinted with the inner puzzle hash.
    async fn classify_from_parent<P: WalletPeer>(
        &mut self,
        peer: &P,
        coin: &Coin,
        created_height: u32,
    ) -> Result<Option<u32>> {
        if self.reward_kind(coin, created_height).is_some() {
            return Ok(None);
        }

        let parent_id = coin.parent_coin_info;

        let parent = match peer.get_coin_states(vec![parent_id], None).await {
            Ok(states) => states
                .into_iter()
                .find(|state| state.coin.coin_id() == parent_id),
            Err(error) => {
                warn!(%error, %parent_id, "failed to fetch parent coin state");
                return Ok(None);
            }
        };

        let Some((parent_coin, spent_height)) =
            parent.and_then(|state| Some((state.coin, state.spent_height?)))
        else {
            return Ok(None);
        };

        let parent_spend = match peer.fetch_puzzle_solution(spent_height, parent_coin).await {
            Ok(coin_spend) => coin_spend,
            Err(error) => {
                warn!(%error, %parent_id, "failed to fetch parent spend");
                return Ok(None);
            }
        };

        let (cat, children) = match parse_cat_children(&parent_spend) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Ok(None),
            Err(error) => {
                warn!(%error, %parent_id, "failed to parse parent spend");
                return Ok(None);
            }
        };

        let Some(hint) = children
            .iter()
            .find(|child| child.coin == *coin)
            .and_then(ChildCoin::hint)
        else {
            return Ok(None);
        };

        let Some(derivation) = fetch_derivation_by_puzzle_hash(self.conn, hint).await? else {
            return Ok(None);
        };

        if derivation.wallet_type != WalletType::Standard
            || cat_puzzle_hash(cat.asset_id, hint) != coin.puzzle_hash
        {
            return Ok(None);
        }

        let new_wallet = NewWallet::Cat {
            asset_id: cat.asset_id,
            name: None,
        };

        let known = self
            .state
            .policies
            .values()
            .any(|policy| policy.matches(&new_wallet));

        if !known
            && !self.config.automatically_add_unknown_cats
            && !self.config.default_cats.contains(&cat.asset_id)
        {
            info!(asset_id = %cat.asset_id, coin_id = %coin.coin_id(), "ignoring coin of unknown CAT");
            return Ok(None);
        }

        Ok(Some(self.create_wallet(new_wallet).await?))
    }

    fn reward_kind(&self, coin: &Coin, height: u32) -> Option<TransactionType> {
        let lowest = height.saturating_sub(self.config.reward_lookback);

        (lowest..=height).rev().find_map(|height| {
            if coin.parent_coin_info == self.config.pool_parent_id(height) {
                Some(TransactionType::CoinbaseReward)
            } else if coin.parent_coin_info == self.config.farmer_parent_id(height) {
                Some(TransactionType::FeeReward)
            } else {
                None
            }
        })
    }

    /// Change is a coin created by spending another coin of the same wallet.
    async fn is_change(&mut self, coin: &Coin, wallet_id: u32) -> Result<bool> {
        Ok(fetch_coin_record(self.conn, coin.parent_coin_info)
            .await?
            .is_some_and(|parent| parent.wallet_id == wallet_id))
    }

    async fn created_time<P: WalletPeer>(&self, peer: &P, height: u32) -> u64 {
        match timestamp_for_height(peer, height, self.config.timestamp_lookback).await {
            Ok(Some(timestamp)) => timestamp,
            Ok(None) => {
                warn!(height, "no transaction block found for timestamp");
                0
            }
            Err(error) => {
                warn!(%error, height, "failed to fetch timestamp");
                0
            }
        }
    }

    /// Marks the unconfirmed transactions which add or remove the coin as confirmed.
    /// Returns whether any transaction refers to the coin at all.
    async fn confirm_transactions(
        &mut self,
        coin_id: Bytes32,
        is_removal: bool,
        height: u32,
    ) -> Result<bool> {
        let transactions = fetch_transactions_with_coin(self.conn, coin_id, is_removal).await?;

        for transaction in &transactions {
            if transaction.confirmed {
                continue;
            }

            set_transaction_confirmed(self.conn, transaction.id, height).await?;

            self.events.push(StateChange::TransactionConfirmed {
                wallet_id: transaction.wallet_id,
                transaction_id: transaction.id,
            });
        }

        Ok(!transactions.is_empty())
    }

    async fn add_coin<P: WalletPeer>(
        &mut self,
        peer: &P,
        coin: Coin,
        created_height: u32,
        wallet_id: u32,
    ) -> Result<()> {
        let coin_id = coin.coin_id();
        let policy = self.policy(wallet_id)?;
        let wallet_type = policy.wallet_type();
        let records_transactions = policy.records_transactions();
        let reward = self.reward_kind(&coin, created_height);

        upsert_coin_record(
            self.conn,
            &CoinRecord {
                coin,
                confirmed_height: created_height,
                spent_height: 0,
                coinbase: reward.is_some(),
                wallet_id,
                wallet_type,
            },
        )
        .await?;

        debug!(%coin_id, wallet_id, amount = coin.amount, created_height, "added coin");
        self.events
            .push(StateChange::CoinAdded { wallet_id, coin_id });

        if records_transactions {
            let kind = if reward.is_some() {
                reward
            } else if self.confirm_transactions(coin_id, false, created_height).await?
                || coin.amount == 0
                || self.is_change(&coin, wallet_id).await?
            {
                None
            } else {
                Some(TransactionType::IncomingTx)
            };

            if let Some(kind) = kind {
                let Some(policy) = self.state.policies.get(&wallet_id) else {
                    return Err(WalletError::UnknownWallet(wallet_id));
                };
                let to_puzzle_hash = policy
                    .convert_puzzle_hash(self.conn, coin.puzzle_hash)
                    .await?;
                let created_time = self.created_time(peer, created_height).await;

                self.add_transaction(TransactionRecord {
                    id: coin_id,
                    confirmed_height: created_height,
                    created_time,
                    to_puzzle_hash,
                    amount: coin.amount,
                    fee_amount: 0,
                    confirmed: true,
                    sent: 0,
                    spend_bundle: None,
                    additions: vec![coin],
                    removals: Vec::new(),
                    wallet_id,
                    trade_id: None,
                    kind,
                    memos: Vec::new(),
                })
                .await?;
            }
        }

        if let Some(policy) = self.state.policies.get_mut(&wallet_id) {
            policy.coin_added(self.conn, &coin).await?;
        }

        Ok(())
    }

    async fn spend_coin<P: WalletPeer>(
        &mut self,
        peer: &P,
        coin: Coin,
        spent_height: u32,
        wallet_id: u32,
        children: &[CoinState],
    ) -> Result<()> {
        let coin_id = coin.coin_id();

        set_coin_spent(self.conn, coin_id, spent_height).await?;

        debug!(%coin_id, wallet_id, spent_height, "coin was spent");
        self.events
            .push(StateChange::CoinRemoved { wallet_id, coin_id });

        if self.confirm_transactions(coin_id, true, spent_height).await?
            || !self.policy(wallet_id)?.records_transactions()
        {
            return Ok(());
        }

        // Nothing we know of spent the coin, so the transfer is reconstructed
        // from what the spend created.
        let additions: Vec<Coin> = children.iter().map(|child| child.coin).collect();
        let mut external = Vec::new();

        for child in &additions {
            if !self.is_ours(child.puzzle_hash).await? {
                external.push(*child);
            }
        }

        let (amount, to_puzzle_hash) = match external.first() {
            Some(first) => (sum_amounts(&external), first.puzzle_hash),
            None => (
                sum_amounts(&additions),
                additions
                    .first()
                    .map_or(coin.puzzle_hash, |child| child.puzzle_hash),
            ),
        };

        let created_time = self.created_time(peer, spent_height).await;

        self.add_transaction(TransactionRecord {
            id: observed_spend_id(coin_id),
            confirmed_height: spent_height,
            created_time,
            to_puzzle_hash,
            amount: u64::try_from(amount).unwrap_or(u64::MAX),
            fee_amount: 0,
            confirmed: true,
            sent: 0,
            spend_bundle: None,
            additions,
            removals: vec![coin],
            wallet_id,
            trade_id: None,
            kind: TransactionType::OutgoingTx,
            memos: Vec::new(),
        })
        .await
    }

    /// Creates a pooling wallet for every pool singleton launched by the spend.
    async fn detect_pool_launch<P: WalletPeer>(
        &mut self,
        peer: &P,
        children: &[CoinState],
    ) -> Result<Vec<CoinState>> {
        let mut discovered = Vec::new();

        for child in children {
            if child.coin.puzzle_hash != Bytes32::new(SINGLETON_LAUNCHER_HASH) {
                continue;
            }

            let Some(spent_height) = child.spent_height else {
                continue;
            };

            let launcher_id = child.coin.coin_id();

            if self
                .state
                .policies
                .values()
                .any(|policy| policy.launcher_id() == Some(launcher_id))
            {
                continue;
            }

            let launcher_spend = match peer.fetch_puzzle_solution(spent_height, child.coin).await {
                Ok(coin_spend) => coin_spend,
                Err(error) => {
                    warn!(%error, %launcher_id, "failed to fetch launcher spend");
                    continue;
                }
            };

            let launch = match PoolLaunch::parse(&mut Allocator::new(), &launcher_spend) {
                Ok(Some(launch)) => launch,
                Ok(None) => continue,
                Err(error) => {
                    warn!(%error, %launcher_id, "failed to parse launcher spend");
                    continue;
                }
            };

            let wallet_id = self
                .create_wallet(NewWallet::Pooling {
                    launcher_id,
                    launch_height: child.created_height.unwrap_or(spent_height),
                })
                .await?;

            info!(%launcher_id, wallet_id, "detected pool singleton launch");

            let singleton = Coin::new(launcher_id, launch.singleton_puzzle_hash, launch.amount);
            let singleton_id = singleton.coin_id();

            self.state
                .interests
                .add_coin_id(self.conn, singleton_id, wallet_id)
                .await?;

            match peer.get_coin_states(vec![singleton_id], None).await {
                Ok(states) => {
                    discovered.extend(states.into_iter().filter(|state| state.coin == singleton));
                }
                Err(error) => {
                    warn!(%error, %launcher_id, "failed to fetch pool singleton, a later update will add it");
                }
            }
        }

        Ok(discovered)
    }

    /// Verifies the ancestry of CAT coins which arrived without it, and removes
    /// those that turn out not to descend from the asset.
    async fn repair_lineage<P: WalletPeer>(&mut self, peer: &P) -> Result<()> {
        let mut budget = self.config.max_lineage_depth;
        let wallet_ids: Vec<u32> = self.state.policies.keys().copied().collect();

        for wallet_id in wallet_ids {
            let Some(policy) = self.state.policies.get_mut(&wallet_id) else {
                continue;
            };

            let invalid = policy.repair_lineage(self.conn, peer, &mut budget).await?;

            for coin in invalid {
                self.purge_descendants(wallet_id, coin).await?;
            }
        }

        Ok(())
    }

    async fn purge_descendants(&mut self, wallet_id: u32, coin: Coin) -> Result<()> {
        warn!(coin_id = %coin.coin_id(), wallet_id, "removing coin with invalid lineage");

        let mut purged = vec![coin.coin_id()];
        let mut generation = vec![coin.coin_id()];

        for _ in 0..self.config.max_lineage_depth {
            let mut next = Vec::new();

            for parent_id in &generation {
                for record in fetch_coin_records_by_parent(self.conn, *parent_id).await? {
                    if record.wallet_id == wallet_id {
                        next.push(record.coin_id());
                    }
                }
            }

            if next.is_empty() {
                break;
            }

            purged.extend(&next);
            generation = next;
        }

        for coin_id in purged {
            self.remove_coin(wallet_id, coin_id).await?;
        }

        Ok(())
    }
}
