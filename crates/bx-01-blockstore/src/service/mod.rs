//! # Service Layer
//!
//! Blockstore implementations, each wrapping the next:
//!
//! - [`BaseBlockstore`] - CID to datastore key mapping, hash-on-read
//! - [`BloomCache`] - Bloom filter + ARC of `has` answers
//! - [`ArcBlockCache`] - ARC of block bodies
//! - [`GcLocker`] - GC / pin lock pair shared with pinning
//! - [`cached_blockstore`] - stacks the caches from [`CacheOpts`](crate::CacheOpts)

pub mod arc_cache;
pub mod base;
pub mod bloom_cache;
pub mod builder;
pub mod gc_locker;

pub use arc_cache::ArcBlockCache;
pub use base::BaseBlockstore;
pub use bloom_cache::{BloomCache, BloomCacheStats};
pub use builder::{cached_blockstore, CachedBlockstore};
pub use gc_locker::{GcGuard, GcLocker, PinGuard};
