use chia_protocol::Bytes32;
use chia_puzzle_types::LineageProof;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{
    convert::{amount_from_sql, amount_to_sql, bytes32},
    Result,
};

fn lineage_from_row(row: &SqliteRow) -> Result<Option<LineageProof>> {
    let parent_parent_coin_info: Option<Vec<u8>> = row.try_get("parent_parent_coin_info")?;
    let parent_inner_puzzle_hash: Option<Vec<u8>> = row.try_get("parent_inner_puzzle_hash")?;
    let parent_amount: Option<i64> = row.try_get("parent_amount")?;

    let (Some(parent_parent_coin_info), Some(parent_inner_puzzle_hash), Some(parent_amount)) =
        (parent_parent_coin_info, parent_inner_puzzle_hash, parent_amount)
    else {
        return Ok(None);
    };

    Ok(Some(LineageProof {
        parent_parent_coin_info: bytes32(parent_parent_coin_info, "lineage parent")?,
        parent_inner_puzzle_hash: bytes32(parent_inner_puzzle_hash, "lineage inner puzzle hash")?,
        parent_amount: amount_from_sql(parent_amount),
    }))
}

/// Stores the lineage a coin passes on to its children.
///
/// A `None` proof marks a coin whose children are genesis coins of the asset.
pub async fn upsert_lineage_proof(
    conn: &mut SqliteConnection,
    wallet_id: u32,
    coin_id: Bytes32,
    proof: Option<&LineageProof>,
) -> Result<()> {
    sqlx::query(
        "
        REPLACE INTO `lineage_proofs` (
            `wallet_id`,
            `coin_id`,
            `parent_parent_coin_info`,
            `parent_inner_puzzle_hash`,
            `parent_amount`
        )
        VALUES (?, ?, ?, ?, ?)
        ",
    )
    .bind(i64::from(wallet_id))
    .bind(coin_id.to_vec())
    .bind(proof.map(|proof| proof.parent_parent_coin_info.to_vec()))
    .bind(proof.map(|proof| proof.parent_inner_puzzle_hash.to_vec()))
    .bind(proof.map(|proof| amount_to_sql(proof.parent_amount)))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// The outer option is whether a row exists, the inner one whether it holds a proof.
pub async fn fetch_lineage_proof(
    conn: &mut SqliteConnection,
    wallet_id: u32,
    coin_id: Bytes32,
) -> Result<Option<Option<LineageProof>>> {
    let row = sqlx::query(
        "
        SELECT `parent_parent_coin_info`, `parent_inner_puzzle_hash`, `parent_amount`
        FROM `lineage_proofs` WHERE `wallet_id` = ? AND `coin_id` = ?
        ",
    )
    .bind(i64::from(wallet_id))
    .bind(coin_id.to_vec())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(lineage_from_row).transpose()
}

pub async fn fetch_lineage_proofs(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<Vec<(Bytes32, Option<LineageProof>)>> {
    let rows = sqlx::query(
        "
        SELECT `coin_id`, `parent_parent_coin_info`, `parent_inner_puzzle_hash`, `parent_amount`
        FROM `lineage_proofs` WHERE `wallet_id` = ?
        ",
    )
    .bind(i64::from(wallet_id))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| Ok((bytes32(row.try_get("coin_id")?, "coin id")?, lineage_from_row(row)?)))
        .collect()
}

pub async fn delete_lineage_proof(
    conn: &mut SqliteConnection,
    wallet_id: u32,
    coin_id: Bytes32,
) -> Result<()> {
    sqlx::query("DELETE FROM `lineage_proofs` WHERE `wallet_id` = ? AND `coin_id` = ?")
        .bind(i64::from(wallet_id))
        .bind(coin_id.to_vec())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Removes the lineage recorded for a coin in every wallet.
pub async fn delete_lineage_proofs_for_coin(
    conn: &mut SqliteConnection,
    coin_id: Bytes32,
) -> Result<()> {
    sqlx::query("DELETE FROM `lineage_proofs` WHERE `coin_id` = ?")
        .bind(coin_id.to_vec())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn delete_lineage_proofs_for_wallet(
    conn: &mut SqliteConnection,
    wallet_id: u32,
) -> Result<()> {
    sqlx::query("DELETE FROM `lineage_proofs` WHERE `wallet_id` = ?")
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
    async fn test_lineage_proofs() -> anyhow::Result<()> {
        let db = Database::memory().await?;
        let mut tx = db.begin().await?;

        let proof = LineageProof {
            parent_parent_coin_info: Bytes32::new([1; 32]),
            parent_inner_puzzle_hash: Bytes32::new([2; 32]),
            parent_amount: 600,
        };

        let coin_id = Bytes32::new([3; 32]);
        let genesis_id = Bytes32::new([4; 32]);

        assert_eq!(fetch_lineage_proof(&mut tx, 2, coin_id).await?, None);

        upsert_lineage_proof(&mut tx, 2, coin_id, Some(&proof)).await?;
        upsert_lineage_proof(&mut tx, 2, genesis_id, None).await?;

        assert_eq!(
            fetch_lineage_proof(&mut tx, 2, coin_id).await?,
            Some(Some(proof))
        );
        assert_eq!(fetch_lineage_proof(&mut tx, 2, genesis_id).await?, Some(None));
        assert_eq!(fetch_lineage_proof(&mut tx, 3, coin_id).await?, None);
        assert_eq!(fetch_lineage_proofs(&mut tx, 2).await?.len(), 2);

        delete_lineage_proofs_for_coin(&mut tx, coin_id).await?;
        assert_eq!(fetch_lineage_proof(&mut tx, 2, coin_id).await?, None);

        Ok(())
    }
}
