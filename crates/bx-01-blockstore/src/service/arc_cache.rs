//! Block body cache.
//!
//! Keeps the most useful ~100 blocks in memory. Sits above the `has`
//! layer, so `has` is always forwarded.

use bx_telemetry::metric_inc;
use bx_telemetry::metrics::CACHE_LOOKUPS;
use parking_lot::Mutex;
use shared_types::{Block, Cid};
use tokio_util::sync::CancellationToken;

use crate::domain::arc::ArcCache;
use crate::ports::inbound::{AllKeys, Blockstore, Result};

pub struct ArcBlockCache<B: Blockstore> {
    inner: B,
    cache: Mutex<ArcCache<Cid, Block>>,
}

impl<B: Blockstore> ArcBlockCache<B> {
    pub fn new(inner: B, size: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(ArcCache::new(size)),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Blockstore> Blockstore for ArcBlockCache<B> {
    fn has(&self, cid: &Cid) -> Result<bool> {
        self.inner.has(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Block> {
        if let Some(block) = self.cache.lock().get(cid) {
            metric_inc!(CACHE_LOOKUPS, &["block_arc", "hit"]);
            return Ok(block);
        }
        metric_inc!(CACHE_LOOKUPS, &["block_arc", "miss"]);

        let block = self.inner.get(cid)?;
        self.cache.lock().add(*cid, block.clone());
        Ok(block)
    }

    fn get_size(&self, cid: &Cid) -> Result<usize> {
        if let Some(block) = self.cache.lock().peek(cid) {
            return Ok(block.len());
        }
        self.inner.get_size(cid)
    }

    fn put(&self, block: Block) -> Result<()> {
        self.inner.put(block.clone())?;
        self.cache.lock().add(*block.cid(), block);
        Ok(())
    }

    fn put_many(&self, blocks: Vec<Block>) -> Result<()> {
        self.inner.put_many(blocks.clone())?;
        let mut cache = self.cache.lock();
        for block in blocks {
            cache.add(*block.cid(), block);
        }
        Ok(())
    }

    fn delete(&self, cid: &Cid) -> Result<()> {
        self.cache.lock().remove(cid);
        self.inner.delete(cid)
    }

    fn all_keys(&self, cancel: &CancellationToken) -> Result<AllKeys> {
        self.inner.all_keys(cancel)
    }

    fn hash_on_read(&self, enabled: bool) {
        if enabled {
            // Cached bodies were never re-verified.
            self.cache.lock().clear();
        }
        self.inner.hash_on_read(enabled);
    }
}
