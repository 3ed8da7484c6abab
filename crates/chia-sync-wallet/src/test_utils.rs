use std::collections::HashMap;

use bip39::Mnemonic;
use chia_bls::{master_to_wallet_unhardened, PublicKey, SecretKey};
use chia_protocol::{Bytes, Bytes32, Coin, CoinSpend, CoinState};
use chia_puzzle_types::{singleton::LauncherSolution, DeriveSynthetic, LineageProof};
use chia_sync_driver::{
    cat_puzzle_hash, spend_standard_coin, standard_inner_spend, standard_puzzle_hash, CatSpend,
    Condition, SpendContext,
};
use chia_sync_store::{fetch_derivation, Database, DerivationRecord};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{KeyDerivation, PeerError, SyncConfig, WalletCoinTracker, WalletPeer};

pub(crate) fn test_secret_key() -> Result<SecretKey, bip39::Error> {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let entropy: [u8; 32] = rng.gen();
    let mnemonic = Mnemonic::from_entropy(&entropy)?;
    Ok(SecretKey::from_seed(&mnemonic.to_seed("")))
}

pub(crate) static TEST_KEYS: Lazy<KeyDerivation> = Lazy::new(|| {
    KeyDerivation::from_secret_key(&test_secret_key().expect("test secret key"))
});

/// A key that belongs to somebody else, for building coins we don't own.
pub(crate) fn other_public_key() -> PublicKey {
    let secret_key = SecretKey::from_seed(&[42; 32]);
    master_to_wallet_unhardened(&secret_key.public_key(), 0).derive_synthetic()
}

pub(crate) fn test_config() -> SyncConfig {
    SyncConfig {
        lookahead_count: 5,
        ..SyncConfig::testnet11()
    }
}

pub(crate) async fn test_tracker(config: SyncConfig) -> anyhow::Result<WalletCoinTracker> {
    let db = Database::memory().await?;
    Ok(WalletCoinTracker::new(db, TEST_KEYS.clone(), config).await?)
}

/// The unhardened derivation of a wallet at an index.
pub(crate) async fn derivation(
    tracker: &WalletCoinTracker,
    wallet_id: u32,
    index: u32,
) -> anyhow::Result<DerivationRecord> {
    let mut conn = tracker.database().acquire().await?;
    fetch_derivation(&mut conn, index, wallet_id, false)
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing derivation {index} of wallet {wallet_id}"))
}

pub(crate) fn coin_state(coin: Coin, created_height: u32, spent_height: Option<u32>) -> CoinState {
    CoinState::new(coin, spent_height, Some(created_height))
}

pub(crate) fn standard_spend(
    coin: Coin,
    synthetic_key: PublicKey,
    conditions: Vec<Condition>,
) -> anyhow::Result<CoinSpend> {
    let mut ctx = SpendContext::new();
    Ok(spend_standard_coin(&mut ctx, coin, synthetic_key, conditions)?)
}

/// A CAT coin owned by [`other_public_key`] along with a spend of it that
/// outputs the conditions. The coin descends from a CAT of the same amount.
pub(crate) fn cat_parent_spend(
    asset_id: Bytes32,
    amount: u64,
    conditions: Vec<Condition>,
) -> anyhow::Result<(Coin, CoinSpend)> {
    let synthetic_key = other_public_key();
    let inner_puzzle_hash = standard_puzzle_hash(synthetic_key);
    let puzzle_hash = cat_puzzle_hash(asset_id, inner_puzzle_hash);

    let lineage_proof = LineageProof {
        parent_parent_coin_info: Bytes32::new([0xee; 32]),
        parent_inner_puzzle_hash: inner_puzzle_hash,
        parent_amount: amount,
    };
    let parent = Coin::new(lineage_proof.parent_parent_coin_info, puzzle_hash, amount);
    let coin = Coin::new(parent.coin_id(), puzzle_hash, amount);

    let mut ctx = SpendContext::new();
    let inner_spend = standard_inner_spend(&mut ctx, synthetic_key, conditions)?;

    let mut coin_spends = CatSpend::new(asset_id)
        .spend(coin, inner_spend, Some(lineage_proof), 0)
        .finish(&mut ctx)?;

    Ok((coin, coin_spends.remove(0)))
}

#[derive(Debug, Default)]
struct PeerData {
    coin_states: IndexMap<Bytes32, CoinState>,
    coin_spends: HashMap<Bytes32, CoinSpend>,
    offline: bool,
}

/// A full node stand-in which answers from coin states and spends given to it.
#[derive(Debug, Default)]
pub(crate) struct TestPeer {
    data: Mutex<PeerData>,
}

impl TestPeer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_coin_state(&self, coin_state: CoinState) {
        self.data
            .lock()
            .coin_states
            .insert(coin_state.coin.coin_id(), coin_state);
    }

    pub(crate) fn add_coin_spend(&self, coin_spend: CoinSpend) {
        self.data
            .lock()
            .coin_spends
            .insert(coin_spend.coin.coin_id(), coin_spend);
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.data.lock().offline = offline;
    }

    fn check_online(&self) -> Result<(), PeerError> {
        if self.data.lock().offline {
            return Err(PeerError::Timeout);
        }
        Ok(())
    }
}

impl WalletPeer for TestPeer {
    async fn get_coin_states(
        &self,
        coin_ids: Vec<Bytes32>,
        _fork_height: Option<u32>,
    ) -> Result<Vec<CoinState>, PeerError> {
        self.check_online()?;

        let data = self.data.lock();

        Ok(coin_ids
            .iter()
            .filter_map(|coin_id| data.coin_states.get(coin_id).cloned())
            .collect())
    }

    async fn fetch_puzzle_solution(
        &self,
        _height: u32,
        coin: Coin,
    ) -> Result<CoinSpend, PeerError> {
        self.check_online()?;

        let coin_id = coin.coin_id();

        self.data
            .lock()
            .coin_spends
            .get(&coin_id)
            .cloned()
            .ok_or(PeerError::Missing(coin_id))
    }

    async fn fetch_children(
        &self,
        coin_id: Bytes32,
        _fork_height: Option<u32>,
    ) -> Result<Vec<CoinState>, PeerError> {
        self.check_online()?;

        Ok(self
            .data
            .lock()
            .coin_states
            .values()
            .filter(|coin_state| coin_state.coin.parent_coin_info == coin_id)
            .cloned()
            .collect())
    }

    async fn get_timestamp_for_height(&self, height: u32) -> Result<Option<u64>, PeerError> {
        self.check_online()?;
        Ok(Some(1_600_000_000 + u64::from(height) * 10))
    }
}

/// A launcher spend whose metadata marks the singleton as a pooling singleton.
pub(crate) fn pool_launcher_spend(
    launcher: Coin,
    singleton_puzzle_hash: Bytes32,
) -> anyhow::Result<CoinSpend> {
    let mut ctx = SpendContext::new();

    let solution = ctx.serialize(&LauncherSolution {
        singleton_puzzle_hash,
        amount: 1,
        key_value_list: vec![(Bytes::new(b"p".to_vec()), Bytes::new(vec![1, 2, 3]))],
    })?;

    Ok(CoinSpend::new(launcher, ctx.serialize(&())?, solution))
}
