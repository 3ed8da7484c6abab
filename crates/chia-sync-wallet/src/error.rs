use chia_protocol::Bytes32;
use chia_sync_driver::DriverError;
use chia_sync_store::StoreError;
use thiserror::Error;

/// A failure reported by the peer layer. These are transient, and the affected
/// coin state is left to be retried on the next sync pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("request timed out")]
    Timeout,

    #[error("request was rejected: {0}")]
    Rejected(String),

    #[error("peer has no data for {0}")]
    Missing(Bytes32),

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("coin states must be sorted by height")]
    UnsortedCoinStates,

    #[error("insufficient funds, {available} is available but {required} is required")]
    InsufficientFunds { available: u128, required: u128 },

    #[error("{required} can't be spent until pending change of {pending} is confirmed")]
    PendingChange { pending: u128, required: u128 },

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unknown wallet {0}")]
    UnknownWallet(u32),

    #[error("hardened keys can't be derived without the master secret key")]
    WatchOnly,

    #[error("{0} is not supported by this wallet")]
    UnsupportedOperation(&'static str),

    #[error("derivation index {0} is out of range")]
    InvalidDerivationIndex(u32),

    #[error("tail program hashes to {actual} instead of {expected}")]
    TailMismatch { expected: Bytes32, actual: Bytes32 },
}

impl From<sqlx::Error> for WalletError {
    fn from(value: sqlx::Error) -> Self {
        Self::Store(value.into())
    }
}

impl From<chia_traits::Error> for WalletError {
    fn from(value: chia_traits::Error) -> Self {
        Self::Store(value.into())
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;
