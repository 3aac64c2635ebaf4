//! Block service and sessions.

pub mod block_service;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use block_service::{BlockService, DEFAULT_LINK_TIMEOUT};
pub use session::BlockSession;
