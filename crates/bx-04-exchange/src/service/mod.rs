//! Exchange services.

pub mod bitswap;
pub mod engine;
mod fetch;
pub mod session;
pub mod want_manager;

#[cfg(test)]
pub(crate) mod test_support;

pub use bitswap::{Bitswap, BitswapStat};
pub use engine::{DecisionEngine, Envelope};
pub use session::{Session, SessionState};
pub use want_manager::{WantManager, MAX_PRIORITY};
