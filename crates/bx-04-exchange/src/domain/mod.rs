//! # Domain Layer
//!
//! Pure exchange state: the wire message, wantlists, peer ledgers and the
//! peer request queue. Nothing here spawns tasks or touches the network.

pub mod config;
pub mod errors;
pub mod ledger;
pub mod message;
pub mod prq;
pub mod wantlist;

pub use config::ExchangeConfig;
pub use errors::{ConfigError, ExchangeError, MessageError, NetworkError};
pub use ledger::{Ledger, Receipt};
pub use message::{BitswapMessage, Entry, ProtocolVersion};
pub use prq::{PeerRequestQueue, PeerTask};
pub use wantlist::{SessionId, WantEntry, Wantlist};
