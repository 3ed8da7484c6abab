use std::collections::HashMap;

use chia_protocol::{Bytes32, Coin};
use chia_puzzle_types::LineageProof;
use chia_sync_store::{
    delete_lineage_proof, fetch_lineage_proofs, upsert_lineage_proof, Result,
};
use sqlx::SqliteConnection;

/// The lineage proofs known to a single CAT wallet.
///
/// Entries are keyed by the id of a parent coin, and hold the proof a child of
/// that coin needs in order to be spent. A `None` proof marks a parent whose
/// children are eve coins. The database is authoritative, this is only a view.
#[derive(Debug, Default, Clone)]
pub struct LineageProofCache {
    wallet_id: u32,
    proofs: HashMap<Bytes32, Option<LineageProof>>,
}

impl LineageProofCache {
    pub fn new(wallet_id: u32) -> Self {
        Self {
            wallet_id,
            proofs: HashMap::new(),
        }
    }

    pub async fn load(conn: &mut SqliteConnection, wallet_id: u32) -> Result<Self> {
        Ok(Self {
            wallet_id,
            proofs: fetch_lineage_proofs(conn, wallet_id)
                .await?
                .into_iter()
                .collect(),
        })
    }

    pub fn wallet_id(&self) -> u32 {
        self.wallet_id
    }

    pub fn get(&self, coin_id: Bytes32) -> Option<Option<LineageProof>> {
        self.proofs.get(&coin_id).copied()
    }

    pub fn contains(&self, coin_id: Bytes32) -> bool {
        self.proofs.contains_key(&coin_id)
    }

    /// The proof needed to spend a coin, which is only known once its parent has been verified.
    pub fn proof_for_coin(&self, coin: &Coin) -> Option<LineageProof> {
        self.get(coin.parent_coin_info).flatten()
    }

    pub async fn put(
        &mut self,
        conn: &mut SqliteConnection,
        coin_id: Bytes32,
        proof: Option<LineageProof>,
    ) -> Result<()> {
        upsert_lineage_proof(conn, self.wallet_id, coin_id, proof.as_ref()).await?;
        self.proofs.insert(coin_id, proof);
        Ok(())
    }

    pub async fn remove(&mut self, conn: &mut SqliteConnection, coin_id: Bytes32) -> Result<()> {
        delete_lineage_proof(conn, self.wallet_id, coin_id).await?;
        self.proofs.remove(&coin_id);
        Ok(())
    }

    /// Drops an entry from the view after the store has already deleted it.
    pub(crate) fn forget(&mut self, coin_id: Bytes32) {
        self.proofs.remove(&coin_id);
    }
}
