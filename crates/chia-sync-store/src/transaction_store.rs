use chia_protocol::{Bytes, Bytes32, Coin, SpendBundle};
use chia_traits::Streamable;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    convert::{amount_from_sql, amount_to_sql, bytes32, coin_from_row, transaction_type},
    Result, TransactionRecord,
};

const TRANSACTION_COLUMNS: &str = "
    `transaction_id`, `confirmed_height`, `created_time`, `to_puzzle_hash`, `amount`,
    `fee_amount`, `confirmed`, `sent`, `spend_bundle`, `wallet_id`, `trade_id`, `kind`, `memos`
";

async fn transaction_from_row(
    conn: &mut SqliteConnection,
    row: &SqliteRow,
) -> Result<TransactionRecord> {
    let id = bytes32(row.try_get("transaction_id")?, "transaction id")?;

    let spend_bundle = row
        .try_get::<Option<Vec<u8>>, _>("spend_bundle")?
        .map(|bytes| SpendBundle::from_bytes(&bytes))
        .transpose()?;

    let trade_id = row
        .try_get::<Option<Vec<u8>>, _>("trade_id")?
        .map(|bytes| bytes32(bytes, "trade id"))
        .transpose()?;

    let memos_bytes: Vec<u8> = row.try_get("memos")?;
    let memos = Vec::<(Bytes32, Vec<Bytes>)>::from_bytes(&memos_bytes)?;

    let additions = fetch_transaction_coins(conn, id, false).await?;
    let removals = fetch_transaction_coins(conn, id, true).await?;

    Ok(TransactionRecord {
        id,
        confirmed_height: row.try_get::<i64, _>("confirmed_height")? as u32,
        created_time: amount_from_sql(row.try_get("created_time")?),
        to_puzzle_hash: bytes32(row.try_get("to_puzzle_hash")?, "to puzzle hash")?,
        amount: amount_from_sql(row.try_get("amount")?),
        fee_amount: amount_from_sql(row.try_get("fee_amount")?),
        confirmed: row.try_get("confirmed")?,
        sent: row.try_get::<i64, _>("sent")? as u32,
        spend_bundle,
        additions,
        removals,
        wallet_id: row.try_get::<i64, _>("wallet_id")? as u32,
        trade_id,
        kind: transaction_type(row.try_get("kind")?)?,
        memos,
    })
}

async fn fetch_transaction_coins(
    conn: &mut SqliteConnection,
    transaction_id: Bytes32,
    is_removal: bool,
) -> Result<Vec<Coin>> {
    let rows = sqlx::query(
        "
        SELECT `parent_coin_info`, `puzzle_hash`, `amount` FROM `transaction_coins`
        WHERE `transaction_id` = ? AND `is_removal` = ?
        ORDER BY `position` ASC
        ",
    )
    .bind(transaction_id.to_vec())
    .bind(is_removal)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(coin_from_row).collect()
}

async fn transactions_from_rows(
    conn: &mut SqliteConnection,
    rows: Vec<SqliteRow>,
) -> Result<Vec<TransactionRecord>> {
    let mut transactions = Vec::with_capacity(rows.len());
    for row in &rows {
        transactions.push(transaction_from_row(conn, row).await?);
    }
    Ok(transactions)
}

/// Insert a transaction record, replacing any previous version with the same id.
pub async fn upsert_transaction(
    conn: &mut SqliteConnection,
    record: &TransactionRecord,
) -> Result<()> {
    let transaction_id = record.id.to_vec();
    let spend_bundle = record
        .spend_bundle
        .as_ref()
        .map(Streamable::to_bytes)
        .transpose()?;
    let memos = record.memos.to_bytes()?;

    sqlx::query(
        "
        REPLACE INTO `transactions` (
            `transaction_id`,
            `confirmed_height`,
            `created_time`,
            `to_puzzle_hash`,
            `amount`,
            `fee_amount`,
            `confirmed`,
            `sent`,
            `spend_bundle`,
            `wallet_id`,
            `trade_id`,
            `kind`,
            `memos`
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(transaction_id.clone())
    .bind(i64::from(record.confirmed_height))
    .bind(amount_to_sql(record.created_time))
    .bind(record.to_puzzle_hash.to_vec())
    .bind(amount_to_sql(record.amount))
    .bind(amount_to_sql(record.fee_amount))
    .bind(record.confirmed)
    .bind(i64::from(record.sent))
    .bind(spend_bundle)
    .bind(i64::from(record.wallet_id))
    .bind(record.trade_id.map(|id| id.to_vec()))
    .bind(record.kind as u8)
    .bind(memos)
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM `transaction_coins` WHERE `transaction_id` = ?")
        .bind(transaction_id.clone())
        .execute(&mut *conn)
        .await?;

    let coins = record
        .additions
        .iter()
        .enumerate()
        .map(|(position, coin)| (position, coin, false))
        .chain(
            record
                .removals
                .iter()
                .enumerate()
                .map(|(position, coin)| (position, coin, true)),
        );

    for (position, coin, is_removal) in coins {
        sqlx::query(
            "
            INSERT INTO `transaction_coins` (
                `transaction_id`,
                `coin_id`,
                `parent_coin_info`,
                `puzzle_hash`,
                `amount`,
                `is_removal`,
                `position`
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(transaction_id.clone())
        .bind(coin.coin_id().to_vec())
        .bind(coin.parent_coin_info.to_vec())
        .bind(coin.puzzle_hash.to_vec())
        .bind(amount_to_sql(coin.amount))
        .bind(is_removal)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Get a transaction by its id.
pub async fn fetch_transaction(
    conn: &mut SqliteConnection,
    transaction_id: Bytes32,
) -> Result<Option<TransactionRecord>> {
    let Some(row) = sqlx::query(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM `transactions` WHERE `transaction_id` = ?"
    ))
    .bind(transaction_id.to_vec())
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    Ok(Some(transaction_from_row(conn, &row).await?))
}

/// Get every transaction belonging to a wallet, in creation order.
pub async fn fetch_transactions(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query(&format!(
        "
        SELECT {TRANSACTION_COLUMNS} FROM `transactions`
        WHERE `wallet_id` = ?
        ORDER BY `created_time` ASC, `transaction_id` ASC
        "
    ))
    .bind(i64::from(wallet_id))
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(conn, rows).await
}

/// Get every transaction in the store.
pub async fn fetch_all_transactions(
    conn: &mut SqliteConnection,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query(&format!(
        "
        SELECT {TRANSACTION_COLUMNS} FROM `transactions`
        ORDER BY `created_time` ASC, `transaction_id` ASC
        "
    ))
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(conn, rows).await
}

/// Get the transactions of a wallet which have not been confirmed yet.
pub async fn fetch_unconfirmed_transactions(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query(&format!(
        "
        SELECT {TRANSACTION_COLUMNS} FROM `transactions`
        WHERE `wallet_id` = ? AND `confirmed` = 0
        ORDER BY `created_time` ASC, `transaction_id` ASC
        "
    ))
    .bind(i64::from(wallet_id))
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(conn, rows).await
}

/// Get the transactions that add (or remove) the given coin.
pub async fn fetch_transactions_with_coin(
    conn: &mut SqliteConnection,
    coin_id: Bytes32,
    is_removal: bool,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query(&format!(
        "
        SELECT {TRANSACTION_COLUMNS} FROM `transactions`
        WHERE `transaction_id` IN (
            SELECT `transaction_id` FROM `transaction_coins`
            WHERE `coin_id` = ? AND `is_removal` = ?
        )
        ORDER BY `created_time` ASC, `transaction_id` ASC
        "
    ))
    .bind(coin_id.to_vec())
    .bind(is_removal)
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(conn, rows).await
}

/// Get the transactions that were confirmed above the given height.
pub async fn fetch_transactions_above(
    conn: &mut SqliteConnection,
    height: u32,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query(&format!(
        "
        SELECT {TRANSACTION_COLUMNS} FROM `transactions`
        WHERE `confirmed` = 1 AND `confirmed_height` > ?
        ORDER BY `confirmed_height` ASC, `transaction_id` ASC
        "
    ))
    .bind(i64::from(height))
    .fetch_all(&mut *conn)
    .await?;

    transactions_from_rows(conn, rows).await
}

pub async fn set_transaction_confirmed(
    conn: &mut SqliteConnection,
    transaction_id: Bytes32,
    height: u32,
) -> Result<()> {
    sqlx::query(
        "
        UPDATE `transactions` SET `confirmed` = 1, `confirmed_height` = ?
        WHERE `transaction_id` = ?
        ",
    )
    .bind(i64::from(height))
    .bind(transaction_id.to_vec())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Marks a transaction as pending again, so that it can be resubmitted.
pub async fn set_transaction_pending(
    conn: &mut SqliteConnection,
    transaction_id: Bytes32,
) -> Result<()> {
    sqlx::query(
        "
        UPDATE `transactions` SET `confirmed` = 0, `confirmed_height` = 0, `sent` = 0
        WHERE `transaction_id` = ?
        ",
    )
    .bind(transaction_id.to_vec())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn delete_transaction(
    conn: &mut SqliteConnection,
    transaction_id: Bytes32,
) -> Result<()> {
    sqlx::query("DELETE FROM `transaction_coins` WHERE `transaction_id` = ?")
        .bind(transaction_id.to_vec())
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM `transactions` WHERE `transaction_id` = ?")
        .bind(transaction_id.to_vec())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Deletes every transaction belonging to a trade, returning the ids of the
/// removed transactions along with the wallets they belonged to.
pub async fn delete_trade_transactions(
    conn: &mut SqliteConnection,
    trade_id: Bytes32,
) -> Result<Vec<(Bytes32, u32)>> {
    let deleted = sqlx::query(
        "
        SELECT `transaction_id`, `wallet_id` FROM `transactions`
        WHERE `trade_id` = ?
        ORDER BY `transaction_id` ASC
        ",
    )
    .bind(trade_id.to_vec())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|row| {
        Ok((
            bytes32(row.try_get("transaction_id")?, "transaction id")?,
            row.try_get::<i64, _>("wallet_id")? as u32,
        ))
    })
    .collect::<Result<Vec<_>>>()?;

    for (transaction_id, _) in &deleted {
        delete_transaction(conn, *transaction_id).await?;
    }

    Ok(deleted)
}

pub async fn delete_transactions_for_wallet(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<()> {
    sqlx::query(
        "
        DELETE FROM `transaction_coins` WHERE `transaction_id` IN (
            SELECT `transaction_id` FROM `transactions` WHERE `wallet_id` = ?
        )
        ",
    )
    .bind(i64::from(wallet_id))
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM `transactions` WHERE `wallet_id` = ?")
        .bind(i64::from(wallet_id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Database, TransactionType};

    use super::*;

    fn outgoing(id: u8, removal: Coin, addition: Coin) -> TransactionRecord {
        TransactionRecord {
            id: Bytes32::new([id; 32]),
            confirmed_height: 0,
            created_time: 100,
            to_puzzle_hash: addition.puzzle_hash,
            amount: addition.amount,
            fee_amount: 5,
            confirmed: false,
            sent: 0,
            spend_bundle: None,
            additions: vec![addition],
            removals: vec![removal],
            wallet_id: 1,
            trade_id: Some(Bytes32::new([9; 32])),
            kind: TransactionType::OutgoingTx,
            memos: vec![(addition.coin_id(), vec![Bytes::from(vec![1, 2, 3])])],
        }
    }

    #[tokio::test]
    async fn test_transaction_lookup_by_coin() -> anyhow::Result<()> {
        let db = Database::memory().await?;
        let mut tx = db.begin().await?;

        let removal = Coin::new(Bytes32::new([1; 32]), Bytes32::new([2; 32]), 100);
        let addition = Coin::new(removal.coin_id(), Bytes32::new([3; 32]), 95);
        let record = outgoing(7, removal, addition);

        upsert_transaction(&mut tx, &record).await?;
        assert_eq!(fetch_transaction(&mut tx, record.id).await?, Some(record.clone()));

        let by_removal = fetch_transactions_with_coin(&mut tx, removal.coin_id(), true).await?;
        assert_eq!(by_removal, vec![record.clone()]);
        assert!(fetch_transactions_with_coin(&mut tx, removal.coin_id(), false)
            .await?
            .is_empty());

        set_transaction_confirmed(&mut tx, record.id, 12).await?;
        assert!(fetch_unconfirmed_transactions(&mut tx, 1).await?.is_empty());
        assert_eq!(fetch_transactions_above(&mut tx, 11).await?.len(), 1);

        set_transaction_pending(&mut tx, record.id).await?;
        assert_eq!(fetch_unconfirmed_transactions(&mut tx, 1).await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_trade_transactions() -> anyhow::Result<()> {
        let db = Database::memory().await?;
        let mut tx = db.begin().await?;

        let removal = Coin::new(Bytes32::new([1; 32]), Bytes32::new([2; 32]), 100);
        let addition = Coin::new(removal.coin_id(), Bytes32::new([3; 32]), 95);

        upsert_transaction(&mut tx, &outgoing(1, removal, addition)).await?;
        upsert_transaction(&mut tx, &outgoing(2, removal, addition)).await?;

        assert_eq!(
            delete_trade_transactions(&mut tx, Bytes32::new([9; 32])).await?,
            vec![(Bytes32::new([1; 32]), 1), (Bytes32::new([2; 32]), 1)]
        );
        assert!(fetch_all_transactions(&mut tx).await?.is_empty());
        assert!(fetch_transactions_with_coin(&mut tx, removal.coin_id(), true)
            .await?
            .is_empty());

        Ok(())
    }
}
