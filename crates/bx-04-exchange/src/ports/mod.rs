//! # Ports
//!
//! - **Inbound**: [`Exchange`] and [`FetchSession`] for callers,
//!   [`NetworkReceiver`] for the transport
//! - **Outbound**: [`BitswapNetwork`]

pub mod inbound;
pub mod outbound;

pub use inbound::{BlockStream, Exchange, FetchSession, NetworkReceiver};
pub use outbound::BitswapNetwork;
