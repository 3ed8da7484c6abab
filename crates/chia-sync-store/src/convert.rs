use chia_bls::PublicKey;
use chia_protocol::{Bytes32, Coin};
use sqlx::{sqlite::SqliteRow, Row};

use crate::{Result, StoreError, TransactionType, WalletType};

pub(crate) fn bytes32(bytes: Vec<u8>, column: &'static str) -> Result<Bytes32> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidRow(column))?;
    Ok(Bytes32::new(bytes))
}

pub(crate) fn public_key(bytes: Vec<u8>) -> Result<PublicKey> {
    let bytes: [u8; 48] = bytes
        .try_into()
        .map_err(|_| StoreError::InvalidRow("public key"))?;
    PublicKey::from_bytes(&bytes).map_err(|_| StoreError::InvalidRow("public key"))
}

pub(crate) fn wallet_type(value: i64) -> Result<WalletType> {
    u8::try_from(value)
        .ok()
        .and_then(WalletType::from_u8)
        .ok_or(StoreError::InvalidRow("wallet type"))
}

pub(crate) fn transaction_type(value: i64) -> Result<TransactionType> {
    u8::try_from(value)
        .ok()
        .and_then(TransactionType::from_u8)
        .ok_or(StoreError::InvalidRow("transaction type"))
}

/// Amounts are stored as the bit pattern of a `u64` in a signed column.
pub(crate) fn amount_to_sql(amount: u64) -> i64 {
    amount as i64
}

pub(crate) fn amount_from_sql(amount: i64) -> u64 {
    amount as u64
}

pub(crate) fn coin_from_row(row: &SqliteRow) -> Result<Coin> {
    Ok(Coin {
        parent_coin_info: bytes32(row.try_get("parent_coin_info")?, "parent coin info")?,
        puzzle_hash: bytes32(row.try_get("puzzle_hash")?, "puzzle hash")?,
        amount: amount_from_sql(row.try_get("amount")?),
    })
}
