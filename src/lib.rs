//! Re-exports the crates that make up the wallet sync engine.
//!
//! * [`driver`] builds, parses and signs the puzzles a wallet spends.
//! * [`store`] persists wallets, coins, derivations and transactions in SQLite.
//! * [`wallet`] ingests coin states from a peer and keeps the store current.

pub use chia_sync_driver as driver;
pub use chia_sync_store as store;
pub use chia_sync_wallet as wallet;
