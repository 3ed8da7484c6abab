use chia_bls::PublicKey;
use chia_protocol::{Bytes32, Coin, CoinSpend};
use chia_sync_driver::{
    announcement_id, coin_set_message, spend_standard_coin, standard_puzzle_hash, Condition,
    DriverError, SpendContext,
};
use chia_sync_store::{fetch_derivation_by_puzzle_hash, TransactionRecord, TransactionType};
use sqlx::SqliteConnection;

use crate::{
    tracker::{unix_time, Session},
    AssetPolicy, Payment, Result, WalletError,
};

use super::sum_amounts;

/// The primary wallet, which holds XCH in coins locked by the standard puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardPolicy {
    wallet_id: u32,
}

impl StandardPolicy {
    pub fn new(wallet_id: u32) -> Self {
        Self { wallet_id }
    }

    pub fn wallet_id(&self) -> u32 {
        self.wallet_id
    }

    pub fn puzzle_hash_for_key(synthetic_key: PublicKey) -> Bytes32 {
        standard_puzzle_hash(synthetic_key)
    }

    /// Spends the coins together. The first coin outputs the conditions, and
    /// when there are several it also announces the set of coins, which the
    /// others assert so that none of them can be spent without it.
    pub(crate) async fn spend_coins(
        conn: &mut SqliteConnection,
        ctx: &mut SpendContext,
        coins: &[Coin],
        conditions: Vec<Condition>,
    ) -> Result<Vec<CoinSpend>> {
        let Some(first) = coins.first() else {
            return Err(WalletError::Internal("no coins to spend".to_string()));
        };

        let message = coin_set_message(coins.iter().map(Coin::coin_id));
        let set_announcement = announcement_id(first.coin_id(), message);

        let mut first_conditions = Some(conditions);
        let mut coin_spends = Vec::with_capacity(coins.len());

        for coin in coins {
            let Some(derivation) = fetch_derivation_by_puzzle_hash(conn, coin.puzzle_hash).await?
            else {
                return Err(WalletError::Internal(format!(
                    "no derivation for coin {}",
                    coin.coin_id()
                )));
            };

            let conditions = if let Some(mut conditions) = first_conditions.take() {
                if coins.len() > 1 {
                    conditions.push(Condition::CreateCoinAnnouncement {
                        message: message.to_vec().into(),
                    });
                }
                conditions
            } else {
                vec![Condition::AssertCoinAnnouncement {
                    announcement_id: set_announcement,
                }]
            };

            coin_spends.push(spend_standard_coin(
                ctx,
                *coin,
                derivation.public_key,
                conditions,
            )?);
        }

        Ok(coin_spends)
    }

    pub(crate) async fn generate_spend(
        &self,
        session: &mut Session<'_>,
        payments: Vec<Payment>,
        fee: u64,
    ) -> Result<Vec<TransactionRecord>> {
        let payment_total = payments
            .iter()
            .try_fold(0u64, |total, payment| total.checked_add(payment.amount))
            .ok_or(DriverError::AmountOverflow)?;
        let total = payment_total
            .checked_add(fee)
            .ok_or(DriverError::AmountOverflow)?;

        let coins = AssetPolicy::Standard(*self)
            .select_coins(session.conn, total)
            .await?;
        let change = u64::try_from(sum_amounts(&coins) - u128::from(total))
            .map_err(|_| DriverError::AmountOverflow)?;

        let mut outputs: Vec<(Bytes32, u64, Vec<_>)> = payments
            .into_iter()
            .map(|payment| (payment.puzzle_hash, payment.amount, payment.memos))
            .collect();

        if change > 0 {
            let derivation = session.next_derivation(self.wallet_id).await?;
            outputs.push((derivation.puzzle_hash, change, Vec::new()));
        }

        let mut conditions: Vec<Condition> = outputs
            .iter()
            .map(|(puzzle_hash, amount, memos)| {
                Condition::create_coin(*puzzle_hash, *amount, memos.clone())
            })
            .collect();

        if fee > 0 {
            conditions.push(Condition::ReserveFee { amount: fee });
        }

        let mut ctx = SpendContext::new();
        let coin_spends = Self::spend_coins(session.conn, &mut ctx, &coins, conditions).await?;
        let spend_bundle = session.sign(coin_spends).await?;

        let parent_coin_id = coins[0].coin_id();
        let additions: Vec<Coin> = outputs
            .iter()
            .map(|(puzzle_hash, amount, _)| Coin::new(parent_coin_id, *puzzle_hash, *amount))
            .collect();
        let memos = additions
            .iter()
            .zip(&outputs)
            .filter(|(_, (_, _, memos))| !memos.is_empty())
            .map(|(coin, (_, _, memos))| (coin.coin_id(), memos.clone()))
            .collect();

        let to_puzzle_hash = outputs
            .first()
            .map_or(Bytes32::default(), |(puzzle_hash, _, _)| *puzzle_hash);

        Ok(vec![TransactionRecord {
            id: spend_bundle.name(),
            confirmed_height: 0,
            created_time: unix_time(),
            to_puzzle_hash,
            amount: payment_total,
            fee_amount: fee,
            confirmed: false,
            sent: 0,
            spend_bundle: Some(spend_bundle),
            additions,
            removals: coins,
            wallet_id: self.wallet_id,
            trade_id: None,
            kind: TransactionType::OutgoingTx,
            memos,
        }])
    }
}
