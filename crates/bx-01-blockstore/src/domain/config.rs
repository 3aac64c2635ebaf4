//! Cache layer configuration.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("bloom filter enabled with zero hash functions")]
    ZeroHashes,
    #[error("too many bloom hash functions: {0}")]
    TooManyHashes(usize),
}

/// Sizing of the cache layers stacked over the base blockstore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOpts {
    /// Bloom filter size in bytes; 0 disables the filter.
    pub has_bloom_filter_size: usize,
    /// Hash functions used by the Bloom filter.
    pub has_bloom_filter_hashes: usize,
    /// Entries in the `has` ARC; 0 disables it.
    pub has_arc_cache_size: usize,
    /// Entries in the block-body ARC; 0 disables it.
    pub block_cache_size: usize,
}

impl Default for CacheOpts {
    fn default() -> Self {
        Self {
            has_bloom_filter_size: 512 << 10,
            has_bloom_filter_hashes: 7,
            has_arc_cache_size: 64 << 10,
            block_cache_size: 100,
        }
    }
}

impl CacheOpts {
    /// No caching at all; every call reaches the datastore.
    pub fn disabled() -> Self {
        Self {
            has_bloom_filter_size: 0,
            has_bloom_filter_hashes: 0,
            has_arc_cache_size: 0,
            block_cache_size: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.has_bloom_filter_size > 0 && self.has_bloom_filter_hashes == 0 {
            return Err(ConfigError::ZeroHashes);
        }
        if self.has_bloom_filter_hashes > 64 {
            return Err(ConfigError::TooManyHashes(self.has_bloom_filter_hashes));
        }
        Ok(())
    }

    pub fn bloom_enabled(&self) -> bool {
        self.has_bloom_filter_size > 0
    }

    /// Whether the `has` layer is needed at all.
    pub fn has_layer_enabled(&self) -> bool {
        self.bloom_enabled() || self.has_arc_cache_size > 0
    }
}
