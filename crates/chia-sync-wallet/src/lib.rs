mod allocator;
mod config;
mod error;
mod events;
mod interest;
mod keys;
mod lineage;
mod peer;
mod policy;
mod tracker;

#[cfg(test)]
mod test_utils;

pub use allocator::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use interest::*;
pub use keys::*;
pub use lineage::*;
pub use peer::*;
pub use policy::*;
pub use tracker::*;
