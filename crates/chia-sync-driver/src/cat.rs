mod cat_puzzle;
mod cat_spend;

pub use cat_puzzle::*;
pub use cat_spend::*;
