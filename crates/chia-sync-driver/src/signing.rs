mod agg_sig_constants;
mod required_signature;

pub use agg_sig_constants::*;
pub use required_signature::*;
