//! # Node Runtime Library
//!
//! Wires the blockswap subsystems into a running node. The `blockswap-node`
//! binary is a thin shell around [`Node::start`].
//!
//! ## Modules
//!
//! - `container/` - [`NodeConfig`] and the [`Node`] that owns all subsystems
//! - `adapters/` - datastore backends (memory, file, RocksDB)
//! - `testnet/` - in-process network and mock DHT for multi-node tests
//!
//! ## Wiring
//!
//! ```text
//!                     ┌──────────────┐
//!   Datastore ──────→ │  Blockstore  │ ← Bloom + ARC caches
//!       │             └──────┬───────┘
//!       │                    │
//!       │        ┌───────────┼────────────┐
//!       │        ↓           ↓            ↓
//!       │    Bitswap ──→ BlockService ←─ Reprovider
//!       │        │           │
//!       └──→ Pinner ←────────┘ (links)
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod container;
pub mod testnet;

pub use container::{ConfigError, DatastoreBackend, DatastoreConfig, GcConfig, Node, NodeConfig, NodeError};
