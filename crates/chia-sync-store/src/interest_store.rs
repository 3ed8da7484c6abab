use chia_protocol::Bytes32;
use sqlx::{Row, SqliteConnection};

use crate::{convert::bytes32, Result};

/// Records that a wallet wants to hear about coins with this puzzle hash.
pub async fn insert_interested_puzzle_hash(
    conn: &mut SqliteConnection,
    puzzle_hash: Bytes32,
    wallet_id: u32,
) -> Result<()> {
    sqlx::query("REPLACE INTO `interested_puzzle_hashes` (`puzzle_hash`, `wallet_id`) VALUES (?, ?)")
        .bind(puzzle_hash.to_vec())
        .bind(i64::from(wallet_id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Records that a wallet wants to hear about a specific coin.
pub async fn insert_interested_coin_id(
    conn: &mut SqliteConnection,
    coin_id: Bytes32,
    wallet_id: u32,
) -> Result<()> {
    sqlx::query("REPLACE INTO `interested_coin_ids` (`coin_id`, `wallet_id`) VALUES (?, ?)")
        .bind(coin_id.to_vec())
        .bind(i64::from(wallet_id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn fetch_puzzle_hash_interest(
    conn: &mut SqliteConnection,
    puzzle_hash: Bytes32,
) -> Result<Option<u32>> {
    let row = sqlx::query("SELECT `wallet_id` FROM `interested_puzzle_hashes` WHERE `puzzle_hash` = ?")
        .bind(puzzle_hash.to_vec())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(match row {
        Some(row) => Some(row.try_get::<i64, _>("wallet_id")? as u32),
        None => None,
    })
}

pub async fn fetch_coin_interest(
    conn: &mut SqliteConnection,
    coin_id: Bytes32,
) -> Result<Option<u32>> {
    let row = sqlx::query("SELECT `wallet_id` FROM `interested_coin_ids` WHERE `coin_id` = ?")
        .bind(coin_id.to_vec())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(match row {
        Some(row) => Some(row.try_get::<i64, _>("wallet_id")? as u32),
        None => None,
    })
}

/// Every watched puzzle hash along with the wallet that asked for it.
pub async fn fetch_interested_puzzle_hashes(
    conn: &mut SqliteConnection,
) -> Result<Vec<(Bytes32, u32)>> {
    sqlx::query("SELECT `puzzle_hash`, `wallet_id` FROM `interested_puzzle_hashes`")
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|row| {
            Ok((
                bytes32(row.try_get("puzzle_hash")?, "puzzle hash")?,
                row.try_get::<i64, _>("wallet_id")? as u32,
            ))
        })
        .collect()
}

/// Every watched coin id along with the wallet that asked for it.
pub async fn fetch_interested_coin_ids(conn: &mut SqliteConnection) -> Result<Vec<(Bytes32, u32)>> {
    sqlx::query("SELECT `coin_id`, `wallet_id` FROM `interested_coin_ids`")
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|row| {
            Ok((
                bytes32(row.try_get("coin_id")?, "coin id")?,
                row.try_get::<i64, _>("wallet_id")? as u32,
            ))
        })
        .collect()
}

pub async fn delete_interested_coin_id(conn: &mut SqliteConnection, coin_id: Bytes32) -> Result<()> {
    sqlx::query("DELETE FROM `interested_coin_ids` WHERE `coin_id` = ?")
        .bind(coin_id.to_vec())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Forgets every interest registered on behalf of a wallet.
pub async fn delete_interests_for_wallet(conn: &mut SqliteConnection, wallet_id: u32) -> Result<()> {
    sqlx::query("DELETE FROM `interested_puzzle_hashes` WHERE `wallet_id` = ?")
        .bind(i64::from(wallet_id))
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM `interested_coin_ids` WHERE `wallet_id` = ?")
        .bind(i64::from(wallet_id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::Database;

    use super::*;

    #[tokio::test]
    async fn test_interests() -> anyhow::Result<()> {
        let db = Database::memory().await?;
        let mut tx = db.begin().await?;

        let puzzle_hash = Bytes32::new([1; 32]);
        let coin_id = Bytes32::new([2; 32]);

        insert_interested_puzzle_hash(&mut tx, puzzle_hash, 1).await?;
        insert_interested_coin_id(&mut tx, coin_id, 4).await?;
        insert_interested_coin_id(&mut tx, coin_id, 5).await?;

        assert_eq!(fetch_puzzle_hash_interest(&mut tx, puzzle_hash).await?, Some(1));
        assert_eq!(fetch_coin_interest(&mut tx, coin_id).await?, Some(5));
        assert_eq!(fetch_interested_coin_ids(&mut tx).await?, [(coin_id, 5)]);

        delete_interests_for_wallet(&mut tx, 1).await?;
        assert_eq!(fetch_puzzle_hash_interest(&mut tx, puzzle_hash).await?, None);
        assert!(fetch_interested_puzzle_hashes(&mut tx).await?.is_empty());

        delete_interested_coin_id(&mut tx, coin_id).await?;
        assert_eq!(fetch_coin_interest(&mut tx, coin_id).await?, None);

        Ok(())
    }
}
