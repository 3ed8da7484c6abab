use chia_protocol::Bytes32;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    convert::{bytes32, public_key, wallet_type},
    DerivationRecord, Result,
};

const DERIVATION_COLUMNS: &str = "
    `derivation_index`, `hardened`, `wallet_id`, `wallet_type`, `puzzle_hash`, `public_key`
";

fn derivation_from_row(row: &SqliteRow) -> Result<DerivationRecord> {
    Ok(DerivationRecord {
        index: row.try_get::<i64, _>("derivation_index")? as u32,
        puzzle_hash: bytes32(row.try_get("puzzle_hash")?, "puzzle hash")?,
        public_key: public_key(row.try_get("public_key")?)?,
        wallet_type: wallet_type(row.try_get("wallet_type")?)?,
        wallet_id: row.try_get::<i64, _>("wallet_id")? as u32,
        hardened: row.try_get("hardened")?,
    })
}

/// Add new derivations to the store. Existing rows keep their used flag.
pub async fn insert_derivations(
    conn: &mut SqliteConnection,
    records: &[DerivationRecord],
) -> Result<()> {
    for record in records {
        sqlx::query(
            "
            INSERT OR IGNORE INTO `derivations` (
                `derivation_index`,
                `hardened`,
                `wallet_id`,
                `wallet_type`,
                `puzzle_hash`,
                `public_key`
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(i64::from(record.index))
        .bind(record.hardened)
        .bind(i64::from(record.wallet_id))
        .bind(record.wallet_type as u8)
        .bind(record.puzzle_hash.to_vec())
        .bind(record.public_key.to_bytes().to_vec())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Get the derivation that generated a puzzle hash, if it's one of ours.
pub async fn fetch_derivation_by_puzzle_hash(
    conn: &mut SqliteConnection,
    puzzle_hash: Bytes32,
) -> Result<Option<DerivationRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {DERIVATION_COLUMNS} FROM `derivations` WHERE `puzzle_hash` = ?"
    ))
    .bind(puzzle_hash.to_vec())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(derivation_from_row).transpose()
}

pub async fn fetch_derivation(
    conn: &mut SqliteConnection,
    index: u32,
    wallet_id: u32,
    hardened: bool,
) -> Result<Option<DerivationRecord>> {
    let row = sqlx::query(&format!(
        "
        SELECT {DERIVATION_COLUMNS} FROM `derivations`
        WHERE `derivation_index` = ? AND `wallet_id` = ? AND `hardened` = ?
        "
    ))
    .bind(i64::from(index))
    .bind(i64::from(wallet_id))
    .bind(hardened)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(derivation_from_row).transpose()
}

/// Get all of the derivations of a wallet in index order.
pub async fn fetch_derivations(
    conn: &mut SqliteConnection,
    wallet_id: u32,
    hardened: bool,
) -> Result<Vec<DerivationRecord>> {
    let rows = sqlx::query(&format!(
        "
        SELECT {DERIVATION_COLUMNS} FROM `derivations`
        WHERE `wallet_id` = ? AND `hardened` = ?
        ORDER BY `derivation_index` ASC
        "
    ))
    .bind(i64::from(wallet_id))
    .bind(hardened)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(derivation_from_row).collect()
}

/// The highest derivation index generated for any wallet.
pub async fn fetch_last_derivation_index(conn: &mut SqliteConnection) -> Result<Option<u32>> {
    let row = sqlx::query("SELECT MAX(`derivation_index`) AS `last` FROM `derivations`")
        .fetch_one(&mut *conn)
        .await?;

    Ok(row
        .try_get::<Option<i64>, _>("last")?
        .map(|index| index as u32))
}

/// The highest derivation index generated for a wallet, in either sequence.
pub async fn fetch_last_derivation_index_for_wallet(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<Option<u32>> {
    let row = sqlx::query(
        "SELECT MAX(`derivation_index`) AS `last` FROM `derivations` WHERE `wallet_id` = ?",
    )
    .bind(i64::from(wallet_id))
    .fetch_one(&mut *conn)
    .await?;

    Ok(row
        .try_get::<Option<i64>, _>("last")?
        .map(|index| index as u32))
}

/// The lowest derivation index which hasn't been marked as used.
pub async fn fetch_unused_derivation_index(conn: &mut SqliteConnection) -> Result<Option<u32>> {
    let row = sqlx::query(
        "SELECT MIN(`derivation_index`) AS `unused` FROM `derivations` WHERE `used` = 0",
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(row
        .try_get::<Option<i64>, _>("unused")?
        .map(|index| index as u32))
}

/// Marks every derivation up to and including the index as used, across all wallets.
pub async fn set_used_up_to(conn: &mut SqliteConnection, index: u32) -> Result<()> {
    sqlx::query("UPDATE `derivations` SET `used` = 1 WHERE `derivation_index` <= ? AND `used` = 0")
        .bind(i64::from(index))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// The number of derivations of a wallet which are still unused.
pub async fn count_unused_derivations(
    conn: &mut SqliteConnection,
    wallet_id: u32,
    hardened: bool,
) -> Result<u32> {
    let row = sqlx::query(
        "
        SELECT COUNT(*) AS `count` FROM `derivations`
        WHERE `wallet_id` = ? AND `hardened` = ? AND `used` = 0
        ",
    )
    .bind(i64::from(wallet_id))
    .bind(hardened)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.try_get::<i64, _>("count")? as u32)
}

pub async fn is_derivation_used(
    conn: &mut SqliteConnection,
    puzzle_hash: Bytes32,
) -> Result<bool> {
    let row = sqlx::query("SELECT `used` FROM `derivations` WHERE `puzzle_hash` = ?")
        .bind(puzzle_hash.to_vec())
        .fetch_optional(&mut *conn)
        .await?;

    Ok(match row {
        Some(row) => row.try_get("used")?,
        None => false,
    })
}

pub async fn delete_derivations_for_wallet(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<()> {
    sqlx::query("DELETE FROM `derivations` WHERE `wallet_id` = ?")
        .bind(i64::from(wallet_id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}
