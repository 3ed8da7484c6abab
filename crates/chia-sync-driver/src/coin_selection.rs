use chia_protocol::Coin;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinSelectionMode {
    /// Keep the order the coins were given in, which callers use for oldest first.
    Oldest,
    Largest,
    Smallest,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoinSelectionError {
    #[error("no spendable coins")]
    NoSpendableCoins,

    #[error("insufficient balance {0}")]
    InsufficientBalance(u128),
}

/// Selects coins until their sum covers the amount. At least one coin is always selected.
pub fn select_coins(
    mut coins: Vec<Coin>,
    amount: u64,
    mode: CoinSelectionMode,
) -> Result<Vec<Coin>, CoinSelectionError> {
    if coins.is_empty() {
        return Err(CoinSelectionError::NoSpendableCoins);
    }

    match mode {
        CoinSelectionMode::Oldest => {}
        CoinSelectionMode::Largest => {
            coins.sort_by(|a, b| b.amount.cmp(&a.amount));
        }
        CoinSelectionMode::Smallest => {
            coins.sort_by(|a, b| a.amount.cmp(&b.amount));
        }
    }

    let amount = u128::from(amount);
    let mut selected_amount = 0;
    let mut selected_coins = Vec::new();

    for coin in coins {
        if selected_amount >= amount && !selected_coins.is_empty() {
            break;
        }

        selected_amount += u128::from(coin.amount);
        selected_coins.push(coin);
    }

    if selected_amount < amount {
        return Err(CoinSelectionError::InsufficientBalance(selected_amount));
    }

    Ok(selected_coins)
}

#[cfg(test)]
mod tests {
    use chia_protocol::Bytes32;

    use super::*;

    fn coins(amounts: &[u64]) -> Vec<Coin> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| Coin::new(Bytes32::new([i as u8; 32]), Bytes32::default(), *amount))
            .collect()
    }

    #[test]
    fn test_select_oldest() -> anyhow::Result<()> {
        let selected = select_coins(coins(&[100, 500, 300]), 550, CoinSelectionMode::Oldest)?;
        assert_eq!(
            selected.iter().map(|coin| coin.amount).collect::<Vec<_>>(),
            [100, 500]
        );
        Ok(())
    }

    #[test]
    fn test_select_largest() -> anyhow::Result<()> {
        let selected = select_coins(coins(&[100, 500, 300]), 550, CoinSelectionMode::Largest)?;
        assert_eq!(
            selected.iter().map(|coin| coin.amount).collect::<Vec<_>>(),
            [500, 300]
        );
        Ok(())
    }

    #[test]
    fn test_zero_amount_selects_a_coin() -> anyhow::Result<()> {
        let selected = select_coins(coins(&[7]), 0, CoinSelectionMode::Smallest)?;
        assert_eq!(selected.len(), 1);
        Ok(())
    }

    #[test]
    fn test_selection_errors() {
        assert_eq!(
            select_coins(Vec::new(), 1, CoinSelectionMode::Oldest),
            Err(CoinSelectionError::NoSpendableCoins)
        );
        assert_eq!(
            select_coins(coins(&[1, 2]), 4, CoinSelectionMode::Oldest),
            Err(CoinSelectionError::InsufficientBalance(3))
        );
    }
}
