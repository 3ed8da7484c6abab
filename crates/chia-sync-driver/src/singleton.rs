use chia_protocol::{Bytes, Bytes32, Coin, CoinSpend};
use chia_puzzle_types::singleton::LauncherSolution;
use chia_puzzles::SINGLETON_LAUNCHER_HASH;
use clvm_traits::{FromClvm, ToClvm};
use clvmr::{Allocator, NodePtr};

use crate::DriverError;

/// The key of the launcher metadata entry that holds a pool state.
pub const POOL_STATE_KEY: &[u8] = b"p";

/// A singleton always has an odd amount, so the successor is the only odd child.
pub fn singleton_successor(children: &[Coin]) -> Option<Coin> {
    let mut odd = children.iter().filter(|coin| coin.amount % 2 == 1);
    let successor = odd.next()?;

    if odd.next().is_some() {
        return None;
    }

    Some(*successor)
}

/// A singleton launcher whose metadata says it is a pooling singleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLaunch {
    pub launcher_id: Bytes32,
    pub singleton_puzzle_hash: Bytes32,
    pub amount: u64,
    pub pool_state: Bytes,
}

impl PoolLaunch {
    pub fn parse(
        allocator: &mut Allocator,
        coin_spend: &CoinSpend,
    ) -> Result<Option<Self>, DriverError> {
        if coin_spend.coin.puzzle_hash != Bytes32::new(SINGLETON_LAUNCHER_HASH) {
            return Ok(None);
        }

        let solution = coin_spend.solution.to_clvm(allocator)?;
        let Ok(solution) = LauncherSolution::<NodePtr>::from_clvm(allocator, solution) else {
            return Ok(None);
        };

        let Ok(key_value_list) =
            Vec::<(Bytes, Bytes)>::from_clvm(allocator, solution.key_value_list)
        else {
            return Ok(None);
        };

        let Some((_, pool_state)) = key_value_list
            .into_iter()
            .find(|(key, _)| key.as_ref() == POOL_STATE_KEY)
        else {
            return Ok(None);
        };

        Ok(Some(Self {
            launcher_id: coin_spend.coin.coin_id(),
            singleton_puzzle_hash: solution.singleton_puzzle_hash,
            amount: solution.amount,
            pool_state,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::SpendContext;

    use super::*;

    #[test]
    fn test_singleton_successor() {
        let parent = Bytes32::new([1; 32]);
        let ph = Bytes32::new([2; 32]);

        assert_eq!(
            singleton_successor(&[Coin::new(parent, ph, 10), Coin::new(parent, ph, 1)]),
            Some(Coin::new(parent, ph, 1))
        );
        assert_eq!(singleton_successor(&[Coin::new(parent, ph, 10)]), None);
        assert_eq!(
            singleton_successor(&[Coin::new(parent, ph, 1), Coin::new(parent, ph, 3)]),
            None
        );
    }

    #[test]
    fn test_pool_launch() -> anyhow::Result<()> {
        let mut ctx = SpendContext::new();

        let launcher = Coin::new(
            Bytes32::new([1; 32]),
            Bytes32::new(SINGLETON_LAUNCHER_HASH),
            1,
        );

        let solution = ctx.serialize(&LauncherSolution {
            singleton_puzzle_hash: Bytes32::new([3; 32]),
            amount: 1,
            key_value_list: vec![(Bytes::new(b"p".to_vec()), Bytes::new(vec![1, 2, 3]))],
        })?;
        let coin_spend = CoinSpend::new(launcher, ctx.serialize(&())?, solution);

        let launch = PoolLaunch::parse(ctx.allocator_mut(), &coin_spend)?.expect("pool launch");
        assert_eq!(launch.launcher_id, launcher.coin_id());
        assert_eq!(launch.singleton_puzzle_hash, Bytes32::new([3; 32]));
        assert_eq!(launch.pool_state, Bytes::new(vec![1, 2, 3]));

        let plain = ctx.serialize(&LauncherSolution {
            singleton_puzzle_hash: Bytes32::new([3; 32]),
            amount: 1,
            key_value_list: (),
        })?;
        let coin_spend = CoinSpend::new(launcher, ctx.serialize(&())?, plain);
        assert_eq!(PoolLaunch::parse(ctx.allocator_mut(), &coin_spend)?, None);

        Ok(())
    }
}
