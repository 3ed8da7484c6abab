use std::future::Future;

use chia_protocol::{Bytes32, Coin, CoinSpend, CoinState};

use crate::PeerError;

/// Everything the sync engine needs from a full node.
///
/// Implementations are responsible for their own timeouts and retries.
pub trait WalletPeer: Send + Sync {
    /// Looks up the current state of a set of coins.
    fn get_coin_states(
        &self,
        coin_ids: Vec<Bytes32>,
        fork_height: Option<u32>,
    ) -> impl Future<Output = Result<Vec<CoinState>, PeerError>> + Send;

    /// Fetches the puzzle reveal and solution of a coin spent at the given height.
    fn fetch_puzzle_solution(
        &self,
        height: u32,
        coin: Coin,
    ) -> impl Future<Output = Result<CoinSpend, PeerError>> + Send;

    /// Fetches the coins created by spending a coin.
    fn fetch_children(
        &self,
        coin_id: Bytes32,
        fork_height: Option<u32>,
    ) -> impl Future<Output = Result<Vec<CoinState>, PeerError>> + Send;

    /// Returns `None` if the block at this height is not a transaction block.
    fn get_timestamp_for_height(
        &self,
        height: u32,
    ) -> impl Future<Output = Result<Option<u64>, PeerError>> + Send;
}
