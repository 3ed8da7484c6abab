use chia_protocol::Bytes32;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    convert::{amount_to_sql, bytes32, coin_from_row, wallet_type},
    CoinRecord, Result,
};

const COIN_COLUMNS: &str = "
    `parent_coin_info`, `puzzle_hash`, `amount`, `confirmed_height`,
    `spent_height`, `coinbase`, `wallet_id`, `wallet_type`
";

fn coin_record_from_row(row: &SqliteRow) -> Result<CoinRecord> {
    Ok(CoinRecord {
        coin: coin_from_row(row)?,
        confirmed_height: row.try_get::<i64, _>("confirmed_height")? as u32,
        spent_height: row.try_get::<i64, _>("spent_height")? as u32,
        coinbase: row.try_get("coinbase")?,
        wallet_id: row.try_get::<i64, _>("wallet_id")? as u32,
        wallet_type: wallet_type(row.try_get("wallet_type")?)?,
    })
}

/// Insert a coin record, replacing any existing record for the same coin.
pub async fn upsert_coin_record(conn: &mut SqliteConnection, record: &CoinRecord) -> Result<()> {
    let coin_id = record.coin_id().to_vec();
    let parent_coin_info = record.coin.parent_coin_info.to_vec();
    let puzzle_hash = record.coin.puzzle_hash.to_vec();

    sqlx::query(
        "
        REPLACE INTO `coin_records` (
            `coin_id`,
            `parent_coin_info`,
            `puzzle_hash`,
            `amount`,
            `confirmed_height`,
            `spent_height`,
            `coinbase`,
            `wallet_id`,
            `wallet_type`
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(coin_id)
    .bind(parent_coin_info)
    .bind(puzzle_hash)
    .bind(amount_to_sql(record.coin.amount))
    .bind(i64::from(record.confirmed_height))
    .bind(i64::from(record.spent_height))
    .bind(record.coinbase)
    .bind(i64::from(record.wallet_id))
    .bind(record.wallet_type as u8)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get a coin record by its coin id.
pub async fn fetch_coin_record(
    conn: &mut SqliteConnection,
    coin_id: Bytes32,
) -> Result<Option<CoinRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {COIN_COLUMNS} FROM `coin_records` WHERE `coin_id` = ?"
    ))
    .bind(coin_id.to_vec())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(coin_record_from_row).transpose()
}

/// Get every coin record owned by a wallet, oldest first.
pub async fn fetch_coin_records(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<Vec<CoinRecord>> {
    let rows = sqlx::query(&format!(
        "
        SELECT {COIN_COLUMNS} FROM `coin_records`
        WHERE `wallet_id` = ?
        ORDER BY `confirmed_height` ASC, `coin_id` ASC
        "
    ))
    .bind(i64::from(wallet_id))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(coin_record_from_row).collect()
}

/// Get the unspent coin records of a wallet, oldest confirmed first.
pub async fn fetch_unspent_coin_records(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<Vec<CoinRecord>> {
    let rows = sqlx::query(&format!(
        "
        SELECT {COIN_COLUMNS} FROM `coin_records`
        WHERE `wallet_id` = ? AND `spent_height` = 0
        ORDER BY `confirmed_height` ASC, `coin_id` ASC
        "
    ))
    .bind(i64::from(wallet_id))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(coin_record_from_row).collect()
}

/// Get the records of every known coin created by the given parent.
pub async fn fetch_coin_records_by_parent(
    conn: &mut SqliteConnection,
    parent_coin_id: Bytes32,
) -> Result<Vec<CoinRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {COIN_COLUMNS} FROM `coin_records` WHERE `parent_coin_info` = ?"
    ))
    .bind(parent_coin_id.to_vec())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(coin_record_from_row).collect()
}

/// Get every coin record in the store, across all wallets.
pub async fn fetch_all_coin_records(conn: &mut SqliteConnection) -> Result<Vec<CoinRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {COIN_COLUMNS} FROM `coin_records` ORDER BY `confirmed_height` ASC, `coin_id` ASC"
    ))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(coin_record_from_row).collect()
}

/// Mark a coin as spent at the given height.
pub async fn set_coin_spent(
    conn: &mut SqliteConnection,
    coin_id: Bytes32,
    spent_height: u32,
) -> Result<()> {
    sqlx::query("UPDATE `coin_records` SET `spent_height` = ? WHERE `coin_id` = ?")
        .bind(i64::from(spent_height))
        .bind(coin_id.to_vec())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn delete_coin_record(conn: &mut SqliteConnection, coin_id: Bytes32) -> Result<()> {
    sqlx::query("DELETE FROM `coin_records` WHERE `coin_id` = ?")
        .bind(coin_id.to_vec())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn delete_coin_records_for_wallet(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<()> {
    sqlx::query("DELETE FROM `coin_records` WHERE `wallet_id` = ?")
        .bind(i64::from(wallet_id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Removes coins confirmed above the height and unspends coins spent above it.
/// Returns the ids of the removed coins.
pub async fn rollback_coin_records(
    conn: &mut SqliteConnection,
    height: u32,
) -> Result<Vec<Bytes32>> {
    let height = i64::from(height);

    let removed = sqlx::query("SELECT `coin_id` FROM `coin_records` WHERE `confirmed_height` > ?")
        .bind(height)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|row| bytes32(row.try_get("coin_id")?, "coin id"))
        .collect::<Result<Vec<_>>>()?;

    sqlx::query("DELETE FROM `coin_records` WHERE `confirmed_height` > ?")
        .bind(height)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE `coin_records` SET `spent_height` = 0 WHERE `spent_height` > ?")
        .bind(height)
        .execute(&mut *conn)
        .await?;

    Ok(removed)
}
