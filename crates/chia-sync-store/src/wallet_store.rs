use chia_protocol::Bytes;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{convert::wallet_type, Result, WalletRecord, WalletType};

fn wallet_from_row(row: &SqliteRow) -> Result<WalletRecord> {
    Ok(WalletRecord {
        id: row.try_get::<i64, _>("id")? as u32,
        name: row.try_get("name")?,
        wallet_type: wallet_type(row.try_get("wallet_type")?)?,
        data: Bytes::new(row.try_get("data")?),
    })
}

/// Creates a wallet and returns its id.
pub async fn insert_wallet(
    conn: &mut SqliteConnection,
    name: &str,
    wallet_type: WalletType,
    data: &Bytes,
) -> Result<u32> {
    let result =
        sqlx::query("INSERT INTO `wallets` (`name`, `wallet_type`, `data`) VALUES (?, ?, ?)")
            .bind(name)
            .bind(wallet_type as u8)
            .bind(data.to_vec())
            .execute(&mut *conn)
            .await?;

    Ok(result.last_insert_rowid() as u32)
}

pub async fn update_wallet_data(conn: &mut SqliteConnection, id: u32, data: &Bytes) -> Result<()> {
    sqlx::query("UPDATE `wallets` SET `data` = ? WHERE `id` = ?")
        .bind(data.to_vec())
        .bind(i64::from(id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn fetch_wallet(conn: &mut SqliteConnection, id: u32) -> Result<Option<WalletRecord>> {
    let row = sqlx::query("SELECT `id`, `name`, `wallet_type`, `data` FROM `wallets` WHERE `id` = ?")
        .bind(i64::from(id))
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(wallet_from_row).transpose()
}

/// Get every wallet, ordered by id.
pub async fn fetch_wallets(conn: &mut SqliteConnection) -> Result<Vec<WalletRecord>> {
    let rows = sqlx::query("SELECT `id`, `name`, `wallet_type`, `data` FROM `wallets` ORDER BY `id`")
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(wallet_from_row).collect()
}

pub async fn delete_wallet(conn: &mut SqliteConnection, id: u32) -> Result<()> {
    sqlx::query("DELETE FROM `wallets` WHERE `id` = ?")
        .bind(i64::from(id))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::Database;

    use super::*;

    #[tokio::test]
    async fn test_wallet_ids_are_sequential() -> anyhow::Result<()> {
        let db = Database::memory().await?;
        let mut tx = db.begin().await?;

        let standard = insert_wallet(&mut tx, "Chia Wallet", WalletType::Standard, &Bytes::default())
            .await?;
        let cat = insert_wallet(&mut tx, "CAT", WalletType::Cat, &Bytes::new(vec![1; 32])).await?;

        assert_eq!(standard, 1);
        assert_eq!(cat, 2);

        update_wallet_data(&mut tx, cat, &Bytes::new(vec![2; 32])).await?;
        let wallet = fetch_wallet(&mut tx, cat).await?.expect("wallet exists");
        assert_eq!(wallet.data, Bytes::new(vec![2; 32]));
        assert_eq!(wallet.wallet_type, WalletType::Cat);

        delete_wallet(&mut tx, cat).await?;
        assert_eq!(fetch_wallets(&mut tx).await?.len(), 1);

        Ok(())
    }
}
