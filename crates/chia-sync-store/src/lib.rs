mod coin_store;
mod convert;
mod database;
mod derivation_store;
mod error;
mod interest_store;
mod lineage_store;
mod records;
mod transaction_store;
mod wallet_store;

pub use coin_store::*;
pub use database::*;
pub use derivation_store::*;
pub use error::*;
pub use interest_store::*;
pub use lineage_store::*;
pub use records::*;
pub use transaction_store::*;
pub use wallet_store::*;
