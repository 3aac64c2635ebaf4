//! # Domain Layer
//!
//! Pure data structures for the blockstore: key layout, the concurrent
//! Bloom filter, the ARC cache and cache sizing.

pub mod arc;
pub mod bloom_filter;
pub mod config;
pub mod errors;
pub mod hash_functions;
pub mod keys;

pub use arc::ArcCache;
pub use bloom_filter::AtomicBloomFilter;
pub use config::{CacheOpts, ConfigError};
pub use errors::BlockstoreError;
pub use keys::{block_prefix, cid_to_key, key_to_cid, BLOCK_PREFIX};
