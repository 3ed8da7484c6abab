use chia_bls::PublicKey;
use chia_protocol::{Bytes, Bytes32, Coin, CoinSpend};
use clvmr::Allocator;

use crate::{coin_spend_conditions, u64_to_bytes, AggSigConstants, Condition, DriverError};

/// A signature that a spend bundle needs before it can be broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredSignature {
    pub public_key: PublicKey,
    pub raw_message: Bytes,
    pub appended_info: Vec<u8>,
    pub domain_string: Option<Bytes32>,
}

impl RequiredSignature {
    /// Returns `None` for conditions that don't require a signature.
    pub fn from_condition(
        coin: &Coin,
        condition: &Condition,
        constants: &AggSigConstants,
    ) -> Option<Self> {
        let (appended_info, domain_string) = match condition {
            Condition::AggSigParent { .. } => {
                (coin.parent_coin_info.to_vec(), Some(constants.parent()))
            }
            Condition::AggSigPuzzle { .. } => (coin.puzzle_hash.to_vec(), Some(constants.puzzle())),
            Condition::AggSigAmount { .. } => (u64_to_bytes(coin.amount), Some(constants.amount())),
            Condition::AggSigPuzzleAmount { .. } => (
                [coin.puzzle_hash.to_vec(), u64_to_bytes(coin.amount)].concat(),
                Some(constants.puzzle_amount()),
            ),
            Condition::AggSigParentAmount { .. } => (
                [coin.parent_coin_info.to_vec(), u64_to_bytes(coin.amount)].concat(),
                Some(constants.parent_amount()),
            ),
            Condition::AggSigParentPuzzle { .. } => (
                [coin.parent_coin_info.to_vec(), coin.puzzle_hash.to_vec()].concat(),
                Some(constants.parent_puzzle()),
            ),
            Condition::AggSigUnsafe { .. } => (Vec::new(), None),
            Condition::AggSigMe { .. } => (coin.coin_id().to_vec(), Some(constants.me())),
            _ => return None,
        };

        let (public_key, message) = condition.agg_sig()?;

        Some(Self {
            public_key,
            raw_message: message.clone(),
            appended_info,
            domain_string,
        })
    }

    /// Calculates the signatures required by a coin spend, by running it.
    pub fn from_coin_spend(
        allocator: &mut Allocator,
        coin_spend: &CoinSpend,
        constants: &AggSigConstants,
    ) -> Result<Vec<Self>, DriverError> {
        let mut required = Vec::new();

        for condition in coin_spend_conditions(allocator, coin_spend)? {
            let Some(signature) = Self::from_condition(&coin_spend.coin, &condition, constants)
            else {
                continue;
            };

            if signature.public_key.is_inf() {
                return Err(DriverError::InfinityPublicKey);
            }

            required.push(signature);
        }

        Ok(required)
    }

    /// Calculates the signatures required by every coin spend in a bundle.
    /// Aggregating all of them is sufficient to sign the bundle.
    pub fn from_coin_spends(
        allocator: &mut Allocator,
        coin_spends: &[CoinSpend],
        constants: &AggSigConstants,
    ) -> Result<Vec<Self>, DriverError> {
        let mut required = Vec::new();
        for coin_spend in coin_spends {
            required.extend(Self::from_coin_spend(allocator, coin_spend, constants)?);
        }
        Ok(required)
    }

    /// The full message that has to be signed.
    pub fn message(&self) -> Vec<u8> {
        let mut message = Vec::from(self.raw_message.as_ref());
        message.extend(&self.appended_info);
        if let Some(domain_string) = self.domain_string {
            message.extend(domain_string.to_bytes());
        }
        message
    }
}
