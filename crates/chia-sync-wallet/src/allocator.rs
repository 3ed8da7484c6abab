use chia_sync_store::{
    count_unused_derivations, fetch_derivation, fetch_last_derivation_index,
    fetch_last_derivation_index_for_wallet, fetch_unused_derivation_index, insert_derivations,
    set_used_up_to, DerivationRecord,
};
use indexmap::IndexMap;
use sqlx::SqliteConnection;
use tracing::{debug, instrument};

use crate::{
    AssetPolicy, InterestRegistry, KeyDerivation, Result, WalletError, MAX_DERIVATION_INDEX,
};

/// Keeps a buffer of unused puzzle hashes ahead of the highest used derivation
/// index, so that coins sent to any of them are noticed.
///
/// Every wallet with derivations gets a puzzle hash at every index, so once an
/// index is used by one wallet it is considered used by all of them.
#[derive(Debug, Clone)]
pub struct DerivationLookaheadAllocator {
    keys: KeyDerivation,
    lookahead_count: u32,
}

impl DerivationLookaheadAllocator {
    pub fn new(keys: KeyDerivation, lookahead_count: u32) -> Self {
        Self {
            keys,
            lookahead_count,
        }
    }

    pub fn keys(&self) -> &KeyDerivation {
        &self.keys
    }

    pub fn lookahead_count(&self) -> u32 {
        self.lookahead_count
    }

    fn sequences(&self) -> &'static [bool] {
        if self.keys.is_watch_only() {
            &[false]
        } else {
            &[false, true]
        }
    }

    /// Generates derivations up to `lookahead_count` past the first unused index,
    /// for every wallet that has derivations.
    #[instrument(skip_all)]
    pub async fn create_more_puzzle_hashes(
        &self,
        conn: &mut SqliteConnection,
        policies: &IndexMap<u32, AssetPolicy>,
        interests: &mut InterestRegistry,
    ) -> Result<Vec<DerivationRecord>> {
        let unused = match fetch_unused_derivation_index(conn).await? {
            Some(index) => index,
            None => fetch_last_derivation_index(conn)
                .await?
                .map_or(0, |last| last + 1),
        };

        let end = unused
            .checked_add(self.lookahead_count)
            .filter(|end| *end <= MAX_DERIVATION_INDEX)
            .ok_or(WalletError::InvalidDerivationIndex(unused))?;

        let mut created = Vec::new();

        for policy in policies.values() {
            let wallet_type = policy.wallet_type();

            if !wallet_type.has_derivations() {
                continue;
            }

            let wallet_id = policy.wallet_id();
            let start = fetch_last_derivation_index_for_wallet(conn, wallet_id)
                .await?
                .map_or(0, |last| last + 1);

            let mut records = Vec::new();

            for index in start..end {
                for &hardened in self.sequences() {
                    let public_key = self.keys.public_key(index, hardened)?;

                    let Some(puzzle_hash) = policy.puzzle_hash_for_key(public_key) else {
                        continue;
                    };

                    records.push(DerivationRecord {
                        index,
                        puzzle_hash,
                        public_key,
                        wallet_type,
                        wallet_id,
                        hardened,
                    });
                }
            }

            insert_derivations(conn, &records).await?;

            for record in &records {
                interests
                    .add_puzzle_hash(conn, record.puzzle_hash, wallet_id)
                    .await?;
            }

            created.extend(records);
        }

        if unused > 0 {
            set_used_up_to(conn, unused - 1).await?;
        }

        if !created.is_empty() {
            debug!(count = created.len(), unused, end, "created derivations");
        }

        self.check_lookahead(conn, policies).await?;

        Ok(created)
    }

    async fn check_lookahead(
        &self,
        conn: &mut SqliteConnection,
        policies: &IndexMap<u32, AssetPolicy>,
    ) -> Result<()> {
        for policy in policies.values() {
            if !policy.wallet_type().has_derivations() {
                continue;
            }

            for &hardened in self.sequences() {
                let unused = count_unused_derivations(conn, policy.wallet_id(), hardened).await?;

                if unused < self.lookahead_count {
                    return Err(WalletError::Internal(format!(
                        "wallet {} has {unused} unused derivations, expected at least {}",
                        policy.wallet_id(),
                        self.lookahead_count
                    )));
                }
            }
        }

        Ok(())
    }

    /// Hands out the first unused derivation of a wallet and marks it as used.
    pub async fn get_unused_derivation_record(
        &self,
        conn: &mut SqliteConnection,
        wallet_id: u32,
        hardened: bool,
        policies: &IndexMap<u32, AssetPolicy>,
        interests: &mut InterestRegistry,
    ) -> Result<DerivationRecord> {
        if hardened && self.keys.is_watch_only() {
            return Err(WalletError::WatchOnly);
        }

        let Some(policy) = policies.get(&wallet_id) else {
            return Err(WalletError::UnknownWallet(wallet_id));
        };

        if !policy.wallet_type().has_derivations() {
            return Err(WalletError::UnsupportedOperation("derivations"));
        }

        let index = match fetch_unused_derivation_index(conn).await? {
            Some(index) => index,
            None => {
                self.create_more_puzzle_hashes(conn, policies, interests)
                    .await?;
                fetch_unused_derivation_index(conn)
                    .await?
                    .ok_or_else(|| WalletError::Internal("no unused derivations".to_string()))?
            }
        };

        let Some(record) = fetch_derivation(conn, index, wallet_id, hardened).await? else {
            return Err(WalletError::Internal(format!(
                "wallet {wallet_id} has no derivation at index {index}"
            )));
        };

        set_used_up_to(conn, index).await?;
        self.create_more_puzzle_hashes(conn, policies, interests)
            .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use chia_protocol::{Bytes, Bytes32};
    use chia_sync_store::{
        fetch_derivations, insert_wallet, is_derivation_used, Database, WalletType,
    };

    use crate::{test_utils::test_secret_key, CatPolicy, StandardPolicy};

    use super::*;

    async fn standard_policies(
        conn: &mut SqliteConnection,
    ) -> anyhow::Result<IndexMap<u32, AssetPolicy>> {
        let id =
            insert_wallet(conn, "Chia Wallet", WalletType::Standard, &Bytes::default()).await?;
        Ok(IndexMap::from([(
            id,
            AssetPolicy::Standard(StandardPolicy::new(id)),
        )]))
    }

    #[tokio::test]
    async fn test_lookahead_is_maintained() -> anyhow::Result<()> {
        let db = Database::memory().await?;
        let mut conn = db.acquire().await?;

        let mut policies = standard_policies(&mut conn).await?;
        let mut interests = InterestRegistry::default();
        let allocator = DerivationLookaheadAllocator::new(
            KeyDerivation::from_secret_key(&test_secret_key()?),
            5,
        );

        let created = allocator
            .create_more_puzzle_hashes(&mut conn, &policies, &mut interests)
            .await?;
        assert_eq!(created.len(), 10);
        assert_eq!(fetch_derivations(&mut conn, 1, false).await?.len(), 5);
        assert_eq!(fetch_derivations(&mut conn, 1, true).await?.len(), 5);

        // Nothing is generated while the buffer is intact.
        assert!(allocator
            .create_more_puzzle_hashes(&mut conn, &policies, &mut interests)
            .await?
            .is_empty());

        let record = allocator
            .get_unused_derivation_record(&mut conn, 1, false, &policies, &mut interests)
            .await?;
        assert_eq!(record.index, 0);
        assert!(is_derivation_used(&mut conn, record.puzzle_hash).await?);
        assert_eq!(count_unused_derivations(&mut conn, 1, false).await?, 5);
        assert_eq!(fetch_derivations(&mut conn, 1, false).await?.len(), 6);

        // A wallet added later catches up to the same indices.
        let cat_id = insert_wallet(&mut conn, "CAT", WalletType::Cat, &Bytes::default()).await?;
        policies.insert(
            cat_id,
            AssetPolicy::Cat(CatPolicy::new(cat_id, Bytes32::new([7; 32]))),
        );
        allocator
            .create_more_puzzle_hashes(&mut conn, &policies, &mut interests)
            .await?;
        assert_eq!(fetch_derivations(&mut conn, cat_id, false).await?.len(), 6);
        assert_eq!(count_unused_derivations(&mut conn, cat_id, false).await?, 5);

        let subscriptions = interests.take_new_subscriptions();
        assert_eq!(subscriptions.puzzle_hashes.len(), 12 + 12);

        Ok(())
    }

    #[tokio::test]
    async fn test_watch_only_has_no_hardened_keys() -> anyhow::Result<()> {
        let db = Database::memory().await?;
        let mut conn = db.acquire().await?;

        let policies = standard_policies(&mut conn).await?;
        let mut interests = InterestRegistry::default();
        let allocator = DerivationLookaheadAllocator::new(
            KeyDerivation::watch_only(test_secret_key()?.public_key()),
            3,
        );

        allocator
            .create_more_puzzle_hashes(&mut conn, &policies, &mut interests)
            .await?;
        assert_eq!(fetch_derivations(&mut conn, 1, false).await?.len(), 3);
        assert!(fetch_derivations(&mut conn, 1, true).await?.is_empty());

        assert!(matches!(
            allocator
                .get_unused_derivation_record(&mut conn, 1, true, &policies, &mut interests)
                .await,
            Err(WalletError::WatchOnly)
        ));
        assert!(matches!(
            allocator
                .get_unused_derivation_record(&mut conn, 9, false, &policies, &mut interests)
                .await,
            Err(WalletError::UnknownWallet(9))
        ));

        Ok(())
    }
}
