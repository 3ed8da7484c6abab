use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use chia_protocol::{Bytes, Bytes32, Coin, CoinState};
use chia_sync_store::{
    fetch_wallet, fetch_wallets, Database, DerivationRecord, TransactionRecord, WalletRecord,
};
use indexmap::IndexMap;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::{
    AssetPolicy, DerivationLookaheadAllocator, InterestRegistry, KeyDerivation, NewWallet,
    Payment, PeerError, Result, StateChange, Subscriptions, SyncConfig, WalletError, WalletPeer,
};

mod balances;
mod ingest;
mod reorg;
mod session;
mod transactions;

pub use balances::*;

pub(crate) use session::*;

/// The in-memory views of what the database holds, guarded by the tracker's lock.
#[derive(Debug, Default)]
pub(crate) struct TrackerState {
    pub(crate) policies: IndexMap<u32, AssetPolicy>,
    pub(crate) interests: InterestRegistry,
    pub(crate) watches: HashMap<Bytes32, u32>,
}

impl TrackerState {
    async fn load(conn: &mut SqliteConnection) -> Result<Self> {
        Ok(Self {
            policies: load_policies(conn).await?,
            interests: InterestRegistry::load(conn).await?,
            watches: HashMap::new(),
        })
    }

    /// Discards changes made by a unit of work which was rolled back.
    /// Watches only live in memory, so they are kept.
    async fn reload(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        self.policies = load_policies(conn).await?;
        self.interests.reload(conn).await?;
        Ok(())
    }
}

async fn load_policies(conn: &mut SqliteConnection) -> Result<IndexMap<u32, AssetPolicy>> {
    let mut policies = IndexMap::new();

    for record in fetch_wallets(conn).await? {
        policies.insert(record.id, AssetPolicy::load(conn, &record).await?);
    }

    Ok(policies)
}

/// Keeps the wallet database in sync with coin state updates from peers.
///
/// Each call is a unit of work, which is either committed as a whole and
/// followed by its notifications, or rolled back without any being sent.
/// Calls that change state are serialized.
#[derive(Debug)]
pub struct WalletCoinTracker {
    db: Database,
    config: SyncConfig,
    allocator: DerivationLookaheadAllocator,
    state: Mutex<TrackerState>,
    events: broadcast::Sender<StateChange>,
}

impl WalletCoinTracker {
    /// Opens the tracker, creating the standard wallet and any default CAT
    /// wallets if they don't exist yet.
    pub async fn new(db: Database, keys: KeyDerivation, config: SyncConfig) -> Result<Self> {
        let allocator = DerivationLookaheadAllocator::new(keys, config.lookahead_count);
        let (events, _) = broadcast::channel(1024);

        let tracker = Self {
            db,
            config,
            allocator,
            state: Mutex::new(TrackerState::default()),
            events,
        };

        {
            let mut state = tracker.state.lock().await;
            let mut tx = tracker.db.begin().await?;
            let mut session = tracker.session(&mut tx, &mut state);
            let result = session.initialize().await;
            let events = session.events;
            tracker.finish(tx, &mut state, result, events).await?;
        }

        Ok(tracker)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyDerivation {
        self.allocator.keys()
    }

    /// Receives every change after the unit of work that made it is committed.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    fn session<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        state: &'a mut TrackerState,
    ) -> Session<'a> {
        Session {
            conn,
            state,
            config: &self.config,
            allocator: &self.allocator,
            events: Vec::new(),
        }
    }

    async fn finish<T>(
        &self,
        tx: Transaction<'static, Sqlite>,
        state: &mut TrackerState,
        result: Result<T>,
        events: Vec<StateChange>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;

                for event in events {
                    debug!(event = event.tag(), wallet_id = ?event.wallet_id(), "notifying");

                    // Nobody may be listening.
                    self.events.send(event).ok();
                }

                Ok(value)
            }
            Err(error) => {
                tx.rollback().await?;
                warn!(%error, "rolled back wallet changes");

                let mut conn = self.db.acquire().await?;
                state.reload(&mut conn).await?;

                Err(error)
            }
        }
    }

    /// Applies coin states received from a peer, which must be sorted by the
    /// height of their latest change. Replaying states which have already been
    /// applied has no effect.
    pub async fn ingest<P: WalletPeer>(
        &self,
        coin_states: Vec<CoinState>,
        peer: &P,
        fork_height: Option<u32>,
    ) -> Result<()> {
        check_sorted(&coin_states)?;

        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session.ingest(peer, coin_states, fork_height).await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    /// Undoes everything confirmed above the height.
    pub async fn rollback_to(&self, height: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session.rollback_to(height).await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    /// Creates a wallet, or returns the id of the one that already exists for the asset.
    pub async fn create_wallet(&self, new_wallet: NewWallet) -> Result<u32> {
        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session.create_wallet(new_wallet).await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    /// Deletes a wallet along with its coins, transactions and derivations.
    pub async fn delete_wallet(&self, wallet_id: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session.delete_wallet(wallet_id).await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    pub async fn get_unused_derivation_record(
        &self,
        wallet_id: u32,
        hardened: bool,
    ) -> Result<DerivationRecord> {
        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session.unused_derivation(wallet_id, hardened).await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    /// Stores the TAIL reveal of a CAT wallet, which is needed to issue or melt.
    pub async fn set_tail_program(&self, wallet_id: u32, tail_program: Bytes) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session.set_tail_program(wallet_id, tail_program).await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    /// Builds and signs the transactions needed to make the payments.
    pub async fn generate_signed_transaction(
        &self,
        wallet_id: u32,
        payments: Vec<Payment>,
        fee: u64,
        delta: i64,
    ) -> Result<Vec<TransactionRecord>> {
        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session
            .generate_signed_transaction(wallet_id, payments, fee, delta)
            .await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    /// Records a transaction which has been submitted but not yet confirmed.
    pub async fn add_pending_transaction(&self, transaction: TransactionRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session.add_pending_transaction(transaction).await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    /// Deletes every transaction belonging to a trade, returning how many there were.
    pub async fn delete_trade_transactions(&self, trade_id: Bytes32) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut tx = self.db.begin().await?;
        let mut session = self.session(&mut tx, &mut state);
        let result = session.delete_trade_transactions(trade_id).await;
        let events = session.events;
        self.finish(tx, &mut state, result, events).await
    }

    pub async fn select_coins(&self, wallet_id: u32, amount: u64) -> Result<Vec<Coin>> {
        let state = self.state.lock().await;

        let Some(policy) = state.policies.get(&wallet_id) else {
            return Err(WalletError::UnknownWallet(wallet_id));
        };

        let mut conn = self.db.acquire().await?;
        policy.select_coins(&mut conn, amount).await
    }

    /// Computes the balances of a wallet from what is committed, without taking the lock.
    pub async fn balance(&self, wallet_id: u32) -> Result<WalletBalance> {
        let mut conn = self.db.acquire().await?;

        let Some(record) = fetch_wallet(&mut conn, wallet_id).await? else {
            return Err(WalletError::UnknownWallet(wallet_id));
        };

        let policy = AssetPolicy::load(&mut conn, &record).await?;
        wallet_balance(&mut conn, &policy).await
    }

    pub async fn wallets(&self) -> Result<Vec<WalletRecord>> {
        let mut conn = self.db.acquire().await?;
        Ok(fetch_wallets(&mut conn).await?)
    }

    /// Emits a notification whenever a coin is created with the puzzle hash.
    pub async fn register_puzzle_hash_watch(&self, puzzle_hash: Bytes32, wallet_id: u32) {
        self.state.lock().await.watches.insert(puzzle_hash, wallet_id);
    }

    /// Puzzle hashes and coin ids registered since the last call, which need to
    /// be subscribed to on connected peers.
    pub async fn take_new_subscriptions(&self) -> Subscriptions {
        self.state.lock().await.interests.take_new_subscriptions()
    }

    /// Everything that has to be subscribed to on a newly connected peer.
    pub async fn all_subscriptions(&self) -> Subscriptions {
        self.state.lock().await.interests.all_subscriptions()
    }

    pub async fn timestamp_for_height<P: WalletPeer>(
        &self,
        peer: &P,
        height: u32,
    ) -> Result<Option<u64>> {
        Ok(timestamp_for_height(peer, height, self.config.timestamp_lookback).await?)
    }
}

/// The timestamp of the nearest transaction block at or below the height.
/// Gives up after looking at `lookback` blocks below it.
pub(crate) async fn timestamp_for_height<P: WalletPeer>(
    peer: &P,
    height: u32,
    lookback: u32,
) -> std::result::Result<Option<u64>, PeerError> {
    let lowest = height.saturating_sub(lookback);
    let mut current = height;

    loop {
        if let Some(timestamp) = peer.get_timestamp_for_height(current).await? {
            return Ok(Some(timestamp));
        }

        if current == lowest {
            return Ok(None);
        }

        current -= 1;
    }
}

pub(crate) fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

fn check_sorted(coin_states: &[CoinState]) -> Result<()> {
    let latest = |coin_state: &CoinState| {
        coin_state
            .created_height
            .unwrap_or(0)
            .max(coin_state.spent_height.unwrap_or(0))
    };

    if coin_states
        .windows(2)
        .any(|pair| latest(&pair[0]) > latest(&pair[1]))
    {
        return Err(WalletError::UnsortedCoinStates);
    }

    Ok(())
}
