use std::collections::HashSet;

use chia_bls::PublicKey;
use chia_protocol::{Bytes, Bytes32, Coin, CoinState};
use chia_sync_driver::{select_coins, standard_puzzle_hash, CoinSelectionError, CoinSelectionMode};
use chia_sync_store::{
    fetch_derivation_by_puzzle_hash, fetch_unconfirmed_transactions, fetch_unspent_coin_records,
    insert_wallet, CoinRecord, TransactionRecord, WalletRecord, WalletType,
};
use sqlx::SqliteConnection;

use crate::{tracker::Session, LineageProofCache, Result, WalletError, WalletPeer};

mod cat;
mod singleton;
mod standard;

pub use cat::*;
pub use singleton::*;
pub use standard::*;

/// An output of a spend built by one of the wallets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub puzzle_hash: Bytes32,
    pub amount: u64,
    pub memos: Vec<Bytes>,
}

impl Payment {
    pub fn new(puzzle_hash: Bytes32, amount: u64) -> Self {
        Self {
            puzzle_hash,
            amount,
            memos: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_memos(mut self, memos: Vec<Bytes>) -> Self {
        self.memos = memos;
        self
    }
}

/// A wallet that can be created on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewWallet {
    Cat {
        asset_id: Bytes32,
        name: Option<String>,
    },
    Did {
        launcher_id: Bytes32,
    },
    Pooling {
        launcher_id: Bytes32,
        launch_height: u32,
    },
}

/// How a sub-wallet interprets and spends the coins assigned to it.
#[derive(Debug, Clone)]
pub enum AssetPolicy {
    Standard(StandardPolicy),
    Cat(CatPolicy),
    Pooling(SingletonPolicy),
    Did(SingletonPolicy),
}

impl AssetPolicy {
    /// Restores a policy from its persisted wallet record.
    pub async fn load(conn: &mut SqliteConnection, record: &WalletRecord) -> Result<Self> {
        Ok(match record.wallet_type {
            WalletType::Standard => Self::Standard(StandardPolicy::new(record.id)),
            WalletType::Cat => {
                let lineage = LineageProofCache::load(conn, record.id).await?;
                Self::Cat(CatPolicy::from_state(record.id, &record.data, lineage)?)
            }
            WalletType::Pooling => Self::Pooling(SingletonPolicy::from_state(record.id, &record.data)?),
            WalletType::DistributedId => {
                Self::Did(SingletonPolicy::from_state(record.id, &record.data)?)
            }
        })
    }

    /// Persists a new wallet record and returns its policy.
    pub async fn create(conn: &mut SqliteConnection, new_wallet: &NewWallet) -> Result<Self> {
        match new_wallet {
            NewWallet::Cat { asset_id, name } => {
                let name = name
                    .clone()
                    .unwrap_or_else(|| CatPolicy::default_name(*asset_id));
                let state = CatPolicy::new(0, *asset_id).state()?;
                let wallet_id = insert_wallet(conn, &name, WalletType::Cat, &state).await?;
                Ok(Self::Cat(CatPolicy::new(wallet_id, *asset_id)))
            }
            NewWallet::Did { launcher_id } => {
                let state = SingletonPolicy::new(0, *launcher_id, 0).state()?;
                let wallet_id =
                    insert_wallet(conn, "DID Wallet", WalletType::DistributedId, &state).await?;
                Ok(Self::Did(SingletonPolicy::new(wallet_id, *launcher_id, 0)))
            }
            NewWallet::Pooling {
                launcher_id,
                launch_height,
            } => {
                let state = SingletonPolicy::new(0, *launcher_id, *launch_height).state()?;
                let wallet_id =
                    insert_wallet(conn, "Pooling Wallet", WalletType::Pooling, &state).await?;
                Ok(Self::Pooling(SingletonPolicy::new(
                    wallet_id,
                    *launcher_id,
                    *launch_height,
                )))
            }
        }
    }

    pub fn wallet_id(&self) -> u32 {
        match self {
            Self::Standard(policy) => policy.wallet_id(),
            Self::Cat(policy) => policy.wallet_id(),
            Self::Pooling(policy) | Self::Did(policy) => policy.wallet_id(),
        }
    }

    pub fn wallet_type(&self) -> WalletType {
        match self {
            Self::Standard(_) => WalletType::Standard,
            Self::Cat(_) => WalletType::Cat,
            Self::Pooling(_) => WalletType::Pooling,
            Self::Did(_) => WalletType::DistributedId,
        }
    }

    pub fn asset_id(&self) -> Option<Bytes32> {
        match self {
            Self::Cat(policy) => Some(policy.asset_id()),
            _ => None,
        }
    }

    pub fn launcher_id(&self) -> Option<Bytes32> {
        match self {
            Self::Pooling(policy) | Self::Did(policy) => Some(policy.launcher_id()),
            _ => None,
        }
    }

    pub fn as_standard(&self) -> Option<StandardPolicy> {
        match self {
            Self::Standard(policy) => Some(*policy),
            _ => None,
        }
    }

    pub fn as_cat_mut(&mut self) -> Option<&mut CatPolicy> {
        match self {
            Self::Cat(policy) => Some(policy),
            _ => None,
        }
    }

    /// Whether this wallet already exists for the requested asset.
    pub fn matches(&self, new_wallet: &NewWallet) -> bool {
        match (self, new_wallet) {
            (Self::Cat(policy), NewWallet::Cat { asset_id, .. }) => policy.asset_id() == *asset_id,
            (Self::Did(policy), NewWallet::Did { launcher_id })
            | (Self::Pooling(policy), NewWallet::Pooling { launcher_id, .. }) => {
                policy.launcher_id() == *launcher_id
            }
            _ => false,
        }
    }

    /// Singleton wallets follow a single coin, and don't record transfers of it.
    pub fn records_transactions(&self) -> bool {
        matches!(self, Self::Standard(_) | Self::Cat(_))
    }

    /// The puzzle hash this wallet receives with for a derived key.
    /// Singleton wallets don't receive with derived keys.
    pub fn puzzle_hash_for_key(&self, synthetic_key: PublicKey) -> Option<Bytes32> {
        match self {
            Self::Standard(_) => Some(StandardPolicy::puzzle_hash_for_key(synthetic_key)),
            Self::Cat(policy) => Some(policy.puzzle_hash_for_key(synthetic_key)),
            Self::Pooling(_) | Self::Did(_) => None,
        }
    }

    /// Coin ids which need to be watched as soon as the wallet exists.
    pub fn initial_coin_interests(&self) -> Vec<Bytes32> {
        match self {
            Self::Did(policy) => vec![policy.launcher_id()],
            _ => Vec::new(),
        }
    }

    /// The puzzle hash shown to the user, which for CATs is the inner puzzle hash.
    pub async fn convert_puzzle_hash(
        &self,
        conn: &mut SqliteConnection,
        puzzle_hash: Bytes32,
    ) -> Result<Bytes32> {
        match self {
            Self::Cat(_) => Ok(fetch_derivation_by_puzzle_hash(conn, puzzle_hash)
                .await?
                .map_or(puzzle_hash, |derivation| {
                    standard_puzzle_hash(derivation.public_key)
                })),
            _ => Ok(puzzle_hash),
        }
    }

    /// Called once a new coin has been stored for this wallet.
    pub async fn coin_added(&mut self, conn: &mut SqliteConnection, coin: &Coin) -> Result<()> {
        match self {
            Self::Cat(policy) => policy.coin_added(conn, coin).await,
            Self::Standard(_) | Self::Pooling(_) | Self::Did(_) => Ok(()),
        }
    }

    /// The child that continues the wallet's singleton, if the spent coin was one.
    pub fn singleton_successor(&self, children: &[CoinState]) -> Option<CoinState> {
        match self {
            Self::Pooling(policy) | Self::Did(policy) => policy.successor(children),
            Self::Standard(_) | Self::Cat(_) => None,
        }
    }

    /// Whether rolling back to the height undoes the action that created the wallet.
    pub fn removed_by_rollback(&self, height: u32) -> bool {
        match self {
            Self::Pooling(policy) => policy.launch_height() > height,
            _ => false,
        }
    }

    /// Verifies the parents of coins whose lineage is unknown, spending at most
    /// `budget` peer lookups. Returns the coins whose ancestry turned out to be invalid.
    pub async fn repair_lineage<P: WalletPeer>(
        &mut self,
        conn: &mut SqliteConnection,
        peer: &P,
        budget: &mut u32,
    ) -> Result<Vec<Coin>> {
        match self {
            Self::Cat(policy) => policy.repair_lineage(conn, peer, budget).await,
            Self::Standard(_) | Self::Pooling(_) | Self::Did(_) => Ok(Vec::new()),
        }
    }

    /// Forgets anything cached about a coin that has been deleted from the store.
    pub fn forget_coin(&mut self, coin_id: Bytes32) {
        if let Self::Cat(policy) = self {
            policy.lineage_mut().forget(coin_id);
        }
    }

    /// Unspent coins which this wallet knows how to spend, oldest first.
    pub async fn eligible_coins(&self, conn: &mut SqliteConnection) -> Result<Vec<CoinRecord>> {
        let records = fetch_unspent_coin_records(conn, self.wallet_id()).await?;

        Ok(match self {
            Self::Cat(policy) => records
                .into_iter()
                .filter(|record| policy.lineage().proof_for_coin(&record.coin).is_some())
                .collect(),
            _ => records,
        })
    }

    /// Selects coins adding up to at least the amount, oldest first.
    pub async fn select_coins(
        &self,
        conn: &mut SqliteConnection,
        amount: u64,
    ) -> Result<Vec<Coin>> {
        let pending = pending_removals(conn, self.wallet_id()).await?;
        let eligible = self.eligible_coins(conn).await?;
        select_spendable(eligible, &pending, amount)
    }

    pub(crate) async fn generate_spend(
        &self,
        session: &mut Session<'_>,
        payments: Vec<Payment>,
        fee: u64,
        delta: i64,
    ) -> Result<Vec<TransactionRecord>> {
        match self {
            Self::Standard(policy) => {
                if delta != 0 {
                    return Err(WalletError::UnsupportedOperation("issuance"));
                }
                policy.generate_spend(session, payments, fee).await
            }
            Self::Cat(policy) => policy.generate_spend(session, payments, fee, delta).await,
            Self::Pooling(_) | Self::Did(_) => {
                Err(WalletError::UnsupportedOperation("generate_spend"))
            }
        }
    }
}

/// Coins of the wallet which are removed by one of its unconfirmed transactions.
pub(crate) async fn pending_removals(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<HashSet<Bytes32>> {
    Ok(fetch_unconfirmed_transactions(conn, wallet_id)
        .await?
        .into_iter()
        .flat_map(|transaction| transaction.removals)
        .map(|coin| coin.coin_id())
        .collect())
}

fn select_spendable(
    eligible: Vec<CoinRecord>,
    pending: &HashSet<Bytes32>,
    amount: u64,
) -> Result<Vec<Coin>> {
    let (blocked, available): (Vec<CoinRecord>, Vec<CoinRecord>) = eligible
        .into_iter()
        .partition(|record| pending.contains(&record.coin_id()));

    let coins = available.iter().map(|record| record.coin).collect();

    match select_coins(coins, amount, CoinSelectionMode::Oldest) {
        Ok(coins) => Ok(coins),
        Err(CoinSelectionError::NoSpendableCoins | CoinSelectionError::InsufficientBalance(_)) => {
            let available: u128 = available.iter().map(|record| u128::from(record.coin.amount)).sum();
            let pending: u128 = blocked.iter().map(|record| u128::from(record.coin.amount)).sum();
            let required = u128::from(amount);

            if pending > 0 && available + pending >= required {
                Err(WalletError::PendingChange { pending, required })
            } else {
                Err(WalletError::InsufficientFunds {
                    available: available + pending,
                    required,
                })
            }
        }
    }
}

pub(crate) fn sum_amounts<'a>(coins: impl IntoIterator<Item = &'a Coin>) -> u128 {
    coins.into_iter().map(|coin| u128::from(coin.amount)).sum()
}
