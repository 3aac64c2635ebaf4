//! # Blockstore (bx-01)
//!
//! Local, content-addressed block storage layered over a
//! [`Datastore`](shared_types::Datastore).
//!
//! ## Architecture
//!
//! ```text
//!   ArcBlockCache   cid -> block, ~100 entries
//!        │
//!   BloomCache      Bloom filter + ARC(cid -> has)
//!        │
//!   BaseBlockstore  /blocks/<BASE32(cid)> -> bytes
//!        │
//!   Datastore       memory | file | rocksdb
//! ```
//!
//! Every layer implements [`Blockstore`], so layers can be stacked or
//! skipped freely. [`GcLocker`] coordinates writers with the garbage
//! collector in `bx-02-pinning`.
//!
//! ## Invariants
//!
//! | Invariant | Description |
//! |-----------|-------------|
//! | Idempotent put | Storing a present block performs no datastore write |
//! | No false negatives | A stored CID is never reported absent by the Bloom filter |
//! | Empty CID | Never reaches the datastore: `get`/`delete` are `NotFound`, `has` is `false` |
//! | Hash on read | When enabled, a tampered block yields `HashMismatch` and stays stored |
//!
//! ## Usage
//!
//! ```ignore
//! use bx_01_blockstore::{cached_blockstore, BaseBlockstore, Blockstore, CacheOpts};
//!
//! let base = BaseBlockstore::new(MemoryDatastore::new());
//! let bs = cached_blockstore(base, &CacheOpts::default(), cancel)?;
//! bs.wait_ready().await;
//! bs.put(block)?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::config::{CacheOpts, ConfigError};
pub use domain::errors::BlockstoreError;
pub use domain::keys::{block_prefix, cid_to_key, key_to_cid};
pub use ports::inbound::{AllKeys, Blockstore};
pub use service::{
    cached_blockstore, ArcBlockCache, BaseBlockstore, BloomCache, BloomCacheStats,
    CachedBlockstore, GcGuard, GcLocker, PinGuard,
};
