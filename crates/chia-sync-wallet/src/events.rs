use chia_protocol::Bytes32;

/// A notification sent to subscribers after a unit of work has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    CoinAdded { wallet_id: u32, coin_id: Bytes32 },
    CoinRemoved { wallet_id: u32, coin_id: Bytes32 },
    TransactionAdded { wallet_id: u32, transaction_id: Bytes32 },
    TransactionConfirmed { wallet_id: u32, transaction_id: Bytes32 },
    PendingTransaction { wallet_id: u32, transaction_id: Bytes32 },
    TransactionDeleted { wallet_id: u32, transaction_id: Bytes32 },
    WalletCreated { wallet_id: u32 },
    WalletDeleted { wallet_id: u32 },
    PuzzleHashCreated {
        wallet_id: u32,
        puzzle_hash: Bytes32,
        coin_id: Bytes32,
    },
    Reorg { height: u32 },
}

impl StateChange {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::CoinAdded { .. } => "coin_added",
            Self::CoinRemoved { .. } => "coin_removed",
            Self::TransactionAdded { .. } => "transaction_added",
            Self::TransactionConfirmed { .. } => "transaction_confirmed",
            Self::PendingTransaction { .. } => "pending_transaction",
            Self::TransactionDeleted { .. } => "transaction_deleted",
            Self::WalletCreated { .. } => "wallet_created",
            Self::WalletDeleted { .. } => "wallet_deleted",
            Self::PuzzleHashCreated { .. } => "puzzle_hash_created",
            Self::Reorg { .. } => "reorg",
        }
    }

    /// The wallet the change applies to, if it's specific to one.
    pub fn wallet_id(&self) -> Option<u32> {
        match *self {
            Self::CoinAdded { wallet_id, .. }
            | Self::CoinRemoved { wallet_id, .. }
            | Self::TransactionAdded { wallet_id, .. }
            | Self::TransactionConfirmed { wallet_id, .. }
            | Self::PendingTransaction { wallet_id, .. }
            | Self::TransactionDeleted { wallet_id, .. }
            | Self::WalletCreated { wallet_id }
            | Self::WalletDeleted { wallet_id }
            | Self::PuzzleHashCreated { wallet_id, .. } => Some(wallet_id),
            Self::Reorg { .. } => None,
        }
    }
}
