use chia_protocol::{Bytes, Bytes32, CoinSpend};
use chia_sha2::Sha256;
use clvmr::Allocator;

use crate::{coin_spend_conditions, Condition, DriverError};

/// The id that asserting a coin announcement refers to.
pub fn announcement_id(coin_id: Bytes32, message: impl AsRef<[u8]>) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(coin_id);
    hasher.update(message);
    Bytes32::new(hasher.finalize())
}

/// The message the first coin of a multi-coin spend announces, committing to
/// the full set of coins being spent together.
pub fn coin_set_message(coin_ids: impl IntoIterator<Item = Bytes32>) -> Bytes32 {
    let mut hasher = Sha256::new();
    for coin_id in coin_ids {
        hasher.update(coin_id);
    }
    Bytes32::new(hasher.finalize())
}

#[derive(Debug, Default, Clone)]
pub struct Announcements {
    pub created_coin: Vec<Bytes>,
    pub asserted_coin: Vec<Bytes32>,
}

/// Collects the coin announcements created and asserted by a coin spend.
pub fn announcements_for_spend(coin_spend: &CoinSpend) -> Result<Announcements, DriverError> {
    let mut announcements = Announcements::default();
    let mut allocator = Allocator::new();

    for condition in coin_spend_conditions(&mut allocator, coin_spend)? {
        match condition {
            Condition::CreateCoinAnnouncement { message } => {
                announcements.created_coin.push(message);
            }
            Condition::AssertCoinAnnouncement { announcement_id } => {
                announcements.asserted_coin.push(announcement_id);
            }
            _ => {}
        }
    }

    Ok(announcements)
}

/// Whether every coin announcement asserted by the spends is created by one of them.
pub fn announcements_are_satisfied(coin_spends: &[CoinSpend]) -> Result<bool, DriverError> {
    let all = coin_spends
        .iter()
        .map(announcements_for_spend)
        .collect::<Result<Vec<_>, _>>()?;

    let created: Vec<Bytes32> = coin_spends
        .iter()
        .zip(&all)
        .flat_map(|(coin_spend, announcements)| {
            let coin_id = coin_spend.coin.coin_id();
            announcements
                .created_coin
                .iter()
                .map(move |message| announcement_id(coin_id, message))
        })
        .collect();

    Ok(all
        .iter()
        .flat_map(|announcements| &announcements.asserted_coin)
        .all(|asserted| created.contains(asserted)))
}
