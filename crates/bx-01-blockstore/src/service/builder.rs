//! Assembles the cache stack over a base blockstore.
//!
//! ```text
//! ArcBlockCache (bodies) -> BloomCache (has) -> inner
//! ```
//!
//! Layers whose size is zero are left out.

use std::sync::Arc;

use shared_types::{Block, Cid};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::config::{CacheOpts, ConfigError};
use crate::ports::inbound::{AllKeys, Blockstore, Result};
use crate::service::arc_cache::ArcBlockCache;
use crate::service::bloom_cache::BloomCache;

/// A blockstore wrapped in the configured cache layers.
#[derive(Clone)]
pub struct CachedBlockstore {
    store: Arc<dyn Blockstore>,
    rebuilt: Option<watch::Receiver<bool>>,
}

impl CachedBlockstore {
    /// Wait for the Bloom rebuild, if any, to finish.
    pub async fn wait_ready(&self) {
        if let Some(rx) = &self.rebuilt {
            let mut rx = rx.clone();
            let _ = rx.wait_for(|done| *done).await;
        }
    }

    /// The stack as a shareable trait object.
    pub fn as_dyn(&self) -> Arc<dyn Blockstore> {
        Arc::clone(&self.store)
    }
}

/// Wrap `inner` according to `opts`.
///
/// The Bloom rebuild starts immediately and stops when `cancel` fires.
pub fn cached_blockstore<B: Blockstore + 'static>(
    inner: B,
    opts: &CacheOpts,
    cancel: CancellationToken,
) -> std::result::Result<CachedBlockstore, ConfigError> {
    opts.validate()?;

    let mut rebuilt = None;
    let mut store: Arc<dyn Blockstore> = Arc::new(inner);

    if opts.has_layer_enabled() {
        let bloom = BloomCache::new(store, opts, cancel);
        rebuilt = Some(bloom.rebuild_signal());
        store = bloom;
    }
    if opts.block_cache_size > 0 {
        store = Arc::new(ArcBlockCache::new(store, opts.block_cache_size));
    }

    info!(
        bloom_bytes = opts.has_bloom_filter_size,
        has_arc = opts.has_arc_cache_size,
        block_cache = opts.block_cache_size,
        "[blockstore] cache stack assembled"
    );
    Ok(CachedBlockstore { store, rebuilt })
}

impl Blockstore for CachedBlockstore {
    fn has(&self, cid: &Cid) -> Result<bool> {
        self.store.has(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Block> {
        self.store.get(cid)
    }

    fn get_size(&self, cid: &Cid) -> Result<usize> {
        self.store.get_size(cid)
    }

    fn put(&self, block: Block) -> Result<()> {
        self.store.put(block)
    }

    fn put_many(&self, blocks: Vec<Block>) -> Result<()> {
        self.store.put_many(blocks)
    }

    fn delete(&self, cid: &Cid) -> Result<()> {
        self.store.delete(cid)
    }

    fn all_keys(&self, cancel: &CancellationToken) -> Result<AllKeys> {
        self.store.all_keys(cancel)
    }

    fn hash_on_read(&self, enabled: bool) {
        self.store.hash_on_read(enabled)
    }
}
