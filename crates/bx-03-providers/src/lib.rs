//! # Providers (bx-03)
//!
//! Who has what: records of which peers provide a CID, and periodic
//! announcement of what this node provides.
//!
//! ## Provider store
//!
//! [`ProviderManager`] is a single task owning an LRU of recent provider
//! sets in front of the datastore. Records live under
//!
//! ```text
//! /providers/<BASE32(cid)>/<BASE32(peer)>  ->  varint(unix nanos)
//! ```
//!
//! and are written through [`AutoBatch`]. A record older than
//! `provide_validity` is never returned and is removed by the periodic
//! sweep.
//!
//! ## Reprovider
//!
//! | Strategy | Announced CIDs |
//! |----------|----------------|
//! | `all` | Every block in the blockstore |
//! | `pinned` | Direct pins, recursive pins and their descendants |
//! | `roots` | Direct pins and recursive roots only |
//!
//! A failed provide is logged and the cycle moves on.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod domain;
pub mod service;

pub use adapters::AutoBatch;
pub use domain::{ProviderConfig, ProviderError, ReproviderConfig, ReproviderStrategy};
pub use service::{
    key_chooser, AllKeysChooser, KeyChooser, PinnedKeysChooser, ProviderManager, Reprovider,
    StreamingCidSet,
};
