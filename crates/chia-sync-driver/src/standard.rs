use chia_bls::PublicKey;
use chia_protocol::{Bytes32, Coin, CoinSpend};
use chia_puzzle_types::standard::{StandardArgs, StandardSolution};
use chia_puzzles::P2_DELEGATED_PUZZLE_OR_HIDDEN_PUZZLE_HASH;
use clvm_traits::{clvm_quote, FromClvm};
use clvm_utils::{tree_hash, CurriedProgram, TreeHash};
use clvmr::{Allocator, NodePtr};

use crate::{Condition, DriverError, SpendContext};

/// An inner puzzle together with the solution it will be spent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerSpend {
    puzzle: NodePtr,
    solution: NodePtr,
}

impl InnerSpend {
    pub fn new(puzzle: NodePtr, solution: NodePtr) -> Self {
        Self { puzzle, solution }
    }

    pub fn puzzle(&self) -> NodePtr {
        self.puzzle
    }

    pub fn solution(&self) -> NodePtr {
        self.solution
    }
}

/// The puzzle hash of the standard puzzle for a synthetic key.
pub fn standard_puzzle_hash(synthetic_key: PublicKey) -> Bytes32 {
    StandardArgs::curry_tree_hash(synthetic_key).into()
}

/// Builds the standard puzzle for a synthetic key, with a delegated puzzle
/// that outputs the given conditions.
pub fn standard_inner_spend(
    ctx: &mut SpendContext,
    synthetic_key: PublicKey,
    conditions: Vec<Condition>,
) -> Result<InnerSpend, DriverError> {
    let standard_puzzle = ctx.standard_puzzle()?;

    let puzzle = ctx.alloc(&CurriedProgram {
        program: standard_puzzle,
        args: StandardArgs::new(synthetic_key),
    })?;

    let solution = ctx.alloc(&StandardSolution {
        original_public_key: None,
        delegated_puzzle: clvm_quote!(conditions),
        solution: (),
    })?;

    Ok(InnerSpend::new(puzzle, solution))
}

/// Spends a standard coin directly, outputting the given conditions.
pub fn spend_standard_coin(
    ctx: &mut SpendContext,
    coin: Coin,
    synthetic_key: PublicKey,
    conditions: Vec<Condition>,
) -> Result<CoinSpend, DriverError> {
    let inner_spend = standard_inner_spend(ctx, synthetic_key, conditions)?;
    let puzzle_reveal = ctx.serialize(&inner_spend.puzzle())?;
    let solution = ctx.serialize(&inner_spend.solution())?;
    Ok(CoinSpend::new(coin, puzzle_reveal, solution))
}

/// Extracts the synthetic key from a standard puzzle, if the puzzle is one.
pub fn parse_standard_puzzle(allocator: &Allocator, puzzle: NodePtr) -> Option<PublicKey> {
    let curried = CurriedProgram::<NodePtr, NodePtr>::from_clvm(allocator, puzzle).ok()?;

    if tree_hash(allocator, curried.program)
        != TreeHash::new(P2_DELEGATED_PUZZLE_OR_HIDDEN_PUZZLE_HASH)
    {
        return None;
    }

    let args = StandardArgs::from_clvm(allocator, curried.args).ok()?;
    Some(args.synthetic_key)
}
