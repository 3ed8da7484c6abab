use chia_protocol::CoinSpend;
use clvm_traits::{FromClvm, ToClvm};
use clvmr::{run_program, Allocator, ChiaDialect, NodePtr};

use crate::{Condition, DriverError};

/// The cost limit used when running puzzles locally.
pub const MAX_PUZZLE_COST: u64 = 11_000_000_000;

/// Encodes an amount the way CLVM encodes positive integers.
pub fn u64_to_bytes(amount: u64) -> Vec<u8> {
    let mut bytes = vec![0];
    bytes.extend_from_slice(&amount.to_be_bytes());

    // Strip leading zeros, unless the next byte would make the number negative.
    let mut start = 0;
    while start < bytes.len()
        && bytes[start] == 0
        && (start + 1 == bytes.len() || bytes[start + 1] & 0x80 == 0)
    {
        start += 1;
    }

    bytes[start..].to_vec()
}

/// Runs a puzzle with its solution and parses the output conditions.
pub fn run_conditions(
    allocator: &mut Allocator,
    puzzle: NodePtr,
    solution: NodePtr,
) -> Result<Vec<Condition>, DriverError> {
    let output = run_program(
        allocator,
        &ChiaDialect::new(0),
        puzzle,
        solution,
        MAX_PUZZLE_COST,
    )?
    .1;
    Ok(Vec::<Condition>::from_clvm(allocator, output)?)
}

/// Runs a coin spend and parses the output conditions.
pub fn coin_spend_conditions(
    allocator: &mut Allocator,
    coin_spend: &CoinSpend,
) -> Result<Vec<Condition>, DriverError> {
    let puzzle = coin_spend.puzzle_reveal.to_clvm(allocator)?;
    let solution = coin_spend.solution.to_clvm(allocator)?;
    run_conditions(allocator, puzzle, solution)
}
