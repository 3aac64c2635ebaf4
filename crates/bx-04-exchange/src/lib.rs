//! # Exchange (bx-04)
//!
//! Block exchange with remote peers over the bitswap wire protocol.
//!
//! ## Request path
//!
//! ```text
//! get_blocks ─► subscribe ─► want manager ─► MsgQueue per peer ─► network
//!                   ▲                                                │
//!                   └──── publish ◄── put_many ◄── receive_message ◄─┘
//! ```
//!
//! ## Serving path
//!
//! ```text
//! receive_message ─► decision engine ─► peer request queue ─► task workers
//!                                                                │
//!                        network ◄── send workers ◄── outbox ◄───┘
//! ```
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`BitswapMessage`] | Wire message, `/ipfs/bitswap/1.0.0` and `1.1.0` |
//! | [`WantManager`] | Local wantlist and per-peer outbound queues |
//! | [`DecisionEngine`] | Peer ledgers and block scheduling |
//! | [`Session`] | Windowed fetches with adaptive provider search |
//! | [`Bitswap`] | Facade tying it together; implements [`Exchange`] |
//!
//! Blocks nobody asked for are dropped, never stored.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::{
    BitswapMessage, ConfigError, Entry, ExchangeConfig, ExchangeError, Ledger, MessageError,
    NetworkError, PeerRequestQueue, PeerTask, ProtocolVersion, Receipt, SessionId, WantEntry,
    Wantlist,
};
pub use ports::{BitswapNetwork, BlockStream, Exchange, FetchSession, NetworkReceiver};
pub use service::{
    Bitswap, BitswapStat, DecisionEngine, Envelope, Session, SessionState, WantManager,
    MAX_PRIORITY,
};
