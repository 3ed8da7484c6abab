use chia_protocol::{Bytes, Bytes32, Coin, CoinSpend};
use clvmr::Allocator;

use crate::{coin_spend_conditions, Condition, DriverError};

/// A coin created by a spend, along with the memos it was created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCoin {
    pub coin: Coin,
    pub memos: Vec<Bytes>,
}

impl ChildCoin {
    pub fn hint(&self) -> Option<Bytes32> {
        hint_from_memos(&self.memos)
    }
}

/// By convention the first memo, if it's 32 bytes long, is the inner puzzle hash of the recipient.
pub fn hint_from_memos(memos: &[Bytes]) -> Option<Bytes32> {
    let memo = memos.first()?;
    Bytes32::try_from(memo.as_ref()).ok()
}

/// Runs a coin spend and returns the coins it creates.
pub fn child_coins(
    allocator: &mut Allocator,
    coin_spend: &CoinSpend,
) -> Result<Vec<ChildCoin>, DriverError> {
    let parent_coin_id = coin_spend.coin.coin_id();

    Ok(coin_spend_conditions(allocator, coin_spend)?
        .into_iter()
        .filter_map(|condition| match condition {
            Condition::CreateCoin {
                puzzle_hash,
                amount,
                memos,
            } => Some(ChildCoin {
                coin: Coin::new(parent_coin_id, puzzle_hash, amount),
                memos,
            }),
            _ => None,
        })
        .collect())
}
