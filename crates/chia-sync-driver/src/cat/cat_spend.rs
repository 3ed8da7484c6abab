use chia_protocol::{Bytes32, Coin, CoinSpend};
use chia_puzzle_types::{
    cat::{CatArgs, CatSolution},
    CoinProof, LineageProof,
};
use chia_puzzles::CAT_PUZZLE_HASH;
use chia_sha2::Sha256;
use clvm_utils::CurriedProgram;

use crate::{announcement_id, Condition, DriverError, InnerSpend, SpendContext};

/// The CAT puzzle prefixes coin announcements made by its inner puzzle with this byte.
pub const CAT_ANNOUNCEMENT_MORPH_BYTE: u8 = 0xca;

/// The id of a coin announcement created by the inner puzzle of a CAT coin,
/// as it appears on chain after the outer puzzle has morphed it.
pub fn cat_announcement_id(coin_id: Bytes32, message: impl AsRef<[u8]>) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update([CAT_ANNOUNCEMENT_MORPH_BYTE]);
    hasher.update(message);
    announcement_id(coin_id, hasher.finalize())
}

/// Builds the ring of CAT spends needed to spend several coins of the same asset together.
#[derive(Debug, Clone)]
pub struct CatSpend {
    asset_id: Bytes32,
    items: Vec<CatSpendItem>,
}

#[derive(Debug, Clone, Copy)]
struct CatSpendItem {
    coin: Coin,
    inner_spend: InnerSpend,
    lineage_proof: Option<LineageProof>,
    extra_delta: i64,
}

impl CatSpend {
    pub fn new(asset_id: Bytes32) -> Self {
        Self {
            asset_id,
            items: Vec::new(),
        }
    }

    /// Adds a coin to the ring. A coin without a lineage proof can only be spent
    /// if its inner puzzle reveals the TAIL.
    #[must_use]
    pub fn spend(
        mut self,
        coin: Coin,
        inner_spend: InnerSpend,
        lineage_proof: Option<LineageProof>,
        extra_delta: i64,
    ) -> Self {
        self.items.push(CatSpendItem {
            coin,
            inner_spend,
            lineage_proof,
            extra_delta,
        });
        self
    }

    pub fn finish(self, ctx: &mut SpendContext) -> Result<Vec<CoinSpend>, DriverError> {
        if self.items.is_empty() {
            return Err(DriverError::EmptyRing);
        }

        let cat_puzzle = ctx.cat_puzzle()?;
        let len = self.items.len();

        let inner_puzzle_hashes: Vec<Bytes32> = self
            .items
            .iter()
            .map(|item| ctx.tree_hash(item.inner_spend.puzzle()).into())
            .collect();

        let mut coin_spends = Vec::with_capacity(len);
        let mut subtotal: i128 = 0;

        for (index, item) in self.items.iter().enumerate() {
            let conditions = ctx.run(item.inner_spend.puzzle(), item.inner_spend.solution())?;

            // The ring must add up to zero, with the TAIL accounting for any extra delta.
            let delta = conditions.iter().fold(
                i128::from(item.coin.amount) + i128::from(item.extra_delta),
                |delta, condition| match condition {
                    Condition::CreateCoin { amount, .. } => delta - i128::from(*amount),
                    _ => delta,
                },
            );

            let prev_subtotal = subtotal;
            subtotal += delta;

            let prev = &self.items[if index == 0 { len - 1 } else { index - 1 }];
            let next_index = if index == len - 1 { 0 } else { index + 1 };
            let next = &self.items[next_index];

            let puzzle_reveal = ctx.serialize(&CurriedProgram {
                program: cat_puzzle,
                args: CatArgs {
                    mod_hash: CAT_PUZZLE_HASH.into(),
                    asset_id: self.asset_id,
                    inner_puzzle: item.inner_spend.puzzle(),
                },
            })?;

            let solution = ctx.serialize(&CatSolution {
                inner_puzzle_solution: item.inner_spend.solution(),
                lineage_proof: item.lineage_proof,
                prev_coin_id: prev.coin.coin_id(),
                this_coin_info: item.coin,
                next_coin_proof: CoinProof {
                    parent_coin_info: next.coin.parent_coin_info,
                    inner_puzzle_hash: inner_puzzle_hashes[next_index],
                    amount: next.coin.amount,
                },
                prev_subtotal: i64::try_from(prev_subtotal)
                    .map_err(|_| DriverError::AmountOverflow)?,
                extra_delta: item.extra_delta,
            })?;

            coin_spends.push(CoinSpend::new(item.coin, puzzle_reveal, solution));
        }

        Ok(coin_spends)
    }
}
