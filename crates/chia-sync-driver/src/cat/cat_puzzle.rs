use chia_protocol::{Bytes32, Coin, CoinSpend};
use chia_puzzle_types::{cat::CatArgs, LineageProof};
use chia_puzzles::CAT_PUZZLE_HASH;
use clvm_traits::{FromClvm, ToClvm};
use clvm_utils::{tree_hash, CurriedProgram, TreeHash};
use clvmr::{Allocator, NodePtr};

use crate::DriverError;

/// The outer puzzle hash of a CAT with the given asset id and inner puzzle hash.
pub fn cat_puzzle_hash(asset_id: Bytes32, inner_puzzle_hash: Bytes32) -> Bytes32 {
    CatArgs::curry_tree_hash(asset_id, inner_puzzle_hash.into()).into()
}

/// A CAT puzzle that has been separated into its asset id and inner puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatPuzzle {
    pub asset_id: Bytes32,
    pub inner_puzzle: NodePtr,
}

impl CatPuzzle {
    /// Returns `None` if the puzzle isn't curried from the CAT puzzle.
    pub fn parse(allocator: &Allocator, puzzle: NodePtr) -> Result<Option<Self>, DriverError> {
        let Ok(curried) = CurriedProgram::<NodePtr, NodePtr>::from_clvm(allocator, puzzle) else {
            return Ok(None);
        };

        if tree_hash(allocator, curried.program) != TreeHash::new(CAT_PUZZLE_HASH) {
            return Ok(None);
        }

        let args = CatArgs::<NodePtr>::from_clvm(allocator, curried.args)?;

        if args.mod_hash != Bytes32::new(CAT_PUZZLE_HASH) {
            return Ok(None);
        }

        Ok(Some(Self {
            asset_id: args.asset_id,
            inner_puzzle: args.inner_puzzle,
        }))
    }
}

/// What a CAT coin spend reveals about its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatParent {
    pub coin: Coin,
    pub asset_id: Bytes32,
    pub inner_puzzle_hash: Bytes32,
}

impl CatParent {
    /// Matches a coin spend against the CAT puzzle.
    pub fn parse(
        allocator: &mut Allocator,
        coin_spend: &CoinSpend,
    ) -> Result<Option<Self>, DriverError> {
        let puzzle = coin_spend.puzzle_reveal.to_clvm(allocator)?;

        let Some(cat) = CatPuzzle::parse(allocator, puzzle)? else {
            return Ok(None);
        };

        let inner_puzzle_hash = tree_hash(allocator, cat.inner_puzzle).into();

        // The reveal must actually be the puzzle of the spent coin.
        if cat_puzzle_hash(cat.asset_id, inner_puzzle_hash) != coin_spend.coin.puzzle_hash {
            return Ok(None);
        }

        Ok(Some(Self {
            coin: coin_spend.coin,
            asset_id: cat.asset_id,
            inner_puzzle_hash,
        }))
    }

    /// The lineage proof of any child created by this spend.
    pub fn child_lineage_proof(&self) -> LineageProof {
        LineageProof {
            parent_parent_coin_info: self.coin.parent_coin_info,
            parent_inner_puzzle_hash: self.inner_puzzle_hash,
            parent_amount: self.coin.amount,
        }
    }
}
