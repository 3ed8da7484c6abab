use chia_bls::PublicKey;
use chia_protocol::{Bytes, Bytes32, Coin, CoinState, SpendBundle};

/// The kind of sub-wallet a record belongs to.
///
/// The discriminants are the wallet type numbers used by Chia's full wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WalletType {
    Standard = 0,
    Cat = 6,
    DistributedId = 8,
    Pooling = 9,
}

impl WalletType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Standard,
            6 => Self::Cat,
            8 => Self::DistributedId,
            9 => Self::Pooling,
            _ => return None,
        })
    }

    /// Whether wallets of this type own a derivation sequence of their own.
    pub fn has_derivations(self) -> bool {
        matches!(self, Self::Standard | Self::Cat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionType {
    IncomingTx = 0,
    OutgoingTx = 1,
    CoinbaseReward = 2,
    FeeReward = 3,
    IncomingTrade = 4,
    OutgoingTrade = 5,
}

impl TransactionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::IncomingTx,
            1 => Self::OutgoingTx,
            2 => Self::CoinbaseReward,
            3 => Self::FeeReward,
            4 => Self::IncomingTrade,
            5 => Self::OutgoingTrade,
            _ => return None,
        })
    }

    /// Transactions of these types are re-marked as pending when the block
    /// that confirmed them is rolled back, since they may confirm again.
    pub fn survives_reorg(self) -> bool {
        matches!(
            self,
            Self::OutgoingTx | Self::OutgoingTrade | Self::IncomingTrade
        )
    }
}

/// A coin owned by one of the wallets, along with its confirmation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinRecord {
    pub coin: Coin,
    pub confirmed_height: u32,
    /// Zero while the coin is unspent.
    pub spent_height: u32,
    pub coinbase: bool,
    pub wallet_id: u32,
    pub wallet_type: WalletType,
}

impl CoinRecord {
    pub fn coin_id(&self) -> Bytes32 {
        self.coin.coin_id()
    }

    pub fn is_spent(&self) -> bool {
        self.spent_height != 0
    }

    /// Whether this record already reflects the heights reported by a coin state.
    pub fn matches_state(&self, coin_state: &CoinState) -> bool {
        coin_state.created_height == Some(self.confirmed_height)
            && coin_state.spent_height.unwrap_or(0) == self.spent_height
    }
}

/// One logical transfer, either observed on chain or built by a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: Bytes32,
    pub confirmed_height: u32,
    pub created_time: u64,
    pub to_puzzle_hash: Bytes32,
    pub amount: u64,
    pub fee_amount: u64,
    pub confirmed: bool,
    pub sent: u32,
    pub spend_bundle: Option<SpendBundle>,
    pub additions: Vec<Coin>,
    pub removals: Vec<Coin>,
    pub wallet_id: u32,
    pub trade_id: Option<Bytes32>,
    pub kind: TransactionType,
    pub memos: Vec<(Bytes32, Vec<Bytes>)>,
}

/// A derived key and the puzzle hash one of the wallets generated from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationRecord {
    pub index: u32,
    pub puzzle_hash: Bytes32,
    pub public_key: PublicKey,
    pub wallet_type: WalletType,
    pub wallet_id: u32,
    pub hardened: bool,
}

/// A sub-wallet and its policy specific state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRecord {
    pub id: u32,
    pub name: String,
    pub wallet_type: WalletType,
    pub data: Bytes,
}
