mod announcements;
mod cat;
mod coin_selection;
mod conditions;
mod error;
mod hints;
mod signing;
mod singleton;
mod spend_context;
mod standard;
mod utils;

pub use announcements::*;
pub use cat::*;
pub use coin_selection::*;
pub use conditions::*;
pub use error::*;
pub use hints::*;
pub use signing::*;
pub use singleton::*;
pub use spend_context::*;
pub use standard::*;
pub use utils::*;
