use std::collections::HashMap;

use chia_protocol::Bytes32;
use chia_sync_store::{
    delete_interested_coin_id, delete_interests_for_wallet, fetch_interested_coin_ids,
    fetch_interested_puzzle_hashes, insert_interested_coin_id, insert_interested_puzzle_hash,
    Result,
};
use sqlx::SqliteConnection;

/// Puzzle hashes and coin ids which have been registered with peers for updates.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Subscriptions {
    pub puzzle_hashes: Vec<Bytes32>,
    pub coin_ids: Vec<Bytes32>,
}

impl Subscriptions {
    pub fn is_empty(&self) -> bool {
        self.puzzle_hashes.is_empty() && self.coin_ids.is_empty()
    }
}

/// Tracks what the wallet has asked peers to watch, and which wallet asked for it.
///
/// New entries are queued until the enclosing service takes them with
/// [`InterestRegistry::take_new_subscriptions`] and forwards them to its peers.
#[derive(Debug, Default, Clone)]
pub struct InterestRegistry {
    puzzle_hashes: HashMap<Bytes32, u32>,
    coin_ids: HashMap<Bytes32, u32>,
    pending: Subscriptions,
}

impl InterestRegistry {
    pub async fn load(conn: &mut SqliteConnection) -> Result<Self> {
        Ok(Self {
            puzzle_hashes: fetch_interested_puzzle_hashes(conn)
                .await?
                .into_iter()
                .collect(),
            coin_ids: fetch_interested_coin_ids(conn).await?.into_iter().collect(),
            pending: Subscriptions::default(),
        })
    }

    /// Replaces the view with what the database holds, keeping queued
    /// subscriptions which are still present.
    pub async fn reload(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        let loaded = Self::load(conn).await?;

        self.pending
            .puzzle_hashes
            .retain(|puzzle_hash| loaded.puzzle_hashes.contains_key(puzzle_hash));
        self.pending
            .coin_ids
            .retain(|coin_id| loaded.coin_ids.contains_key(coin_id));

        self.puzzle_hashes = loaded.puzzle_hashes;
        self.coin_ids = loaded.coin_ids;

        Ok(())
    }

    pub fn wallet_for_puzzle_hash(&self, puzzle_hash: Bytes32) -> Option<u32> {
        self.puzzle_hashes.get(&puzzle_hash).copied()
    }

    pub fn wallet_for_coin_id(&self, coin_id: Bytes32) -> Option<u32> {
        self.coin_ids.get(&coin_id).copied()
    }

    pub async fn add_puzzle_hash(
        &mut self,
        conn: &mut SqliteConnection,
        puzzle_hash: Bytes32,
        wallet_id: u32,
    ) -> Result<()> {
        if self.puzzle_hashes.get(&puzzle_hash) == Some(&wallet_id) {
            return Ok(());
        }

        insert_interested_puzzle_hash(conn, puzzle_hash, wallet_id).await?;
        self.puzzle_hashes.insert(puzzle_hash, wallet_id);
        self.pending.puzzle_hashes.push(puzzle_hash);
        Ok(())
    }

    pub async fn add_coin_id(
        &mut self,
        conn: &mut SqliteConnection,
        coin_id: Bytes32,
        wallet_id: u32,
    ) -> Result<()> {
        if self.coin_ids.get(&coin_id) == Some(&wallet_id) {
            return Ok(());
        }

        insert_interested_coin_id(conn, coin_id, wallet_id).await?;
        self.coin_ids.insert(coin_id, wallet_id);
        self.pending.coin_ids.push(coin_id);
        Ok(())
    }

    pub async fn remove_coin_id(
        &mut self,
        conn: &mut SqliteConnection,
        coin_id: Bytes32,
    ) -> Result<()> {
        delete_interested_coin_id(conn, coin_id).await?;
        self.coin_ids.remove(&coin_id);
        self.pending.coin_ids.retain(|pending| *pending != coin_id);
        Ok(())
    }

    pub async fn remove_wallet(&mut self, conn: &mut SqliteConnection, wallet_id: u32) -> Result<()> {
        delete_interests_for_wallet(conn, wallet_id).await?;

        let puzzle_hashes = &mut self.puzzle_hashes;
        let coin_ids = &mut self.coin_ids;

        self.pending
            .puzzle_hashes
            .retain(|puzzle_hash| puzzle_hashes.get(puzzle_hash) != Some(&wallet_id));
        self.pending
            .coin_ids
            .retain(|coin_id| coin_ids.get(coin_id) != Some(&wallet_id));

        puzzle_hashes.retain(|_, id| *id != wallet_id);
        coin_ids.retain(|_, id| *id != wallet_id);

        Ok(())
    }

    /// Every puzzle hash and coin id, for resubscribing after connecting to a new peer.
    pub fn all_subscriptions(&self) -> Subscriptions {
        Subscriptions {
            puzzle_hashes: self.puzzle_hashes.keys().copied().collect(),
            coin_ids: self.coin_ids.keys().copied().collect(),
        }
    }

    /// The entries added since the last call.
    pub fn take_new_subscriptions(&mut self) -> Subscriptions {
        std::mem::take(&mut self.pending)
    }
}
