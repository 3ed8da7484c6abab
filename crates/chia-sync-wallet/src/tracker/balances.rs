use std::collections::HashSet;

use chia_protocol::Bytes32;
use chia_sync_store::{
    fetch_derivation_by_puzzle_hash, fetch_unconfirmed_transactions, fetch_unspent_coin_records,
};
use sqlx::SqliteConnection;

use crate::{AssetPolicy, Result};

/// The most coins a single spend is expected to combine.
pub const MAX_SEND_COINS: usize = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalletBalance {
    /// The sum of unspent coins.
    pub confirmed: u128,
    /// The confirmed balance after every pending transaction goes through.
    pub unconfirmed: u128,
    /// Coins which aren't being spent by a pending transaction and can be spent now.
    pub spendable: u128,
    /// Change owed back to the wallet by its pending transactions.
    pub pending_change: u128,
    /// The largest amount a single spend can send.
    pub max_send_amount: u128,
}

pub(crate) async fn wallet_balance(
    conn: &mut SqliteConnection,
    policy: &AssetPolicy,
) -> Result<WalletBalance> {
    let wallet_id = policy.wallet_id();

    let unspent = fetch_unspent_coin_records(conn, wallet_id).await?;
    let unspent_ids: HashSet<Bytes32> = unspent.iter().map(|record| record.coin_id()).collect();
    let confirmed: u128 = unspent
        .iter()
        .map(|record| u128::from(record.coin.amount))
        .sum();

    let mut removed = HashSet::new();
    let mut pending_removals = 0u128;
    let mut pending_additions = 0u128;
    let mut pending_change = 0u128;

    for transaction in fetch_unconfirmed_transactions(conn, wallet_id).await? {
        let mut spends_ours = false;

        for coin in &transaction.removals {
            let coin_id = coin.coin_id();

            if unspent_ids.contains(&coin_id) && removed.insert(coin_id) {
                pending_removals += u128::from(coin.amount);
                spends_ours = true;
            }
        }

        for coin in &transaction.additions {
            let owner = fetch_derivation_by_puzzle_hash(conn, coin.puzzle_hash)
                .await?
                .map(|derivation| derivation.wallet_id);

            if owner == Some(wallet_id) {
                pending_additions += u128::from(coin.amount);

                if spends_ours {
                    pending_change += u128::from(coin.amount);
                }
            }
        }
    }

    let mut spendable: Vec<u128> = policy
        .eligible_coins(conn)
        .await?
        .into_iter()
        .filter(|record| !removed.contains(&record.coin_id()))
        .map(|record| u128::from(record.coin.amount))
        .collect();

    spendable.sort_unstable_by(|a, b| b.cmp(a));

    Ok(WalletBalance {
        confirmed,
        unconfirmed: (confirmed + pending_additions).saturating_sub(pending_removals),
        spendable: spendable.iter().sum(),
        pending_change,
        max_send_amount: spendable.iter().take(MAX_SEND_COINS).sum(),
    })
}
