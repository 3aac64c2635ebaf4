//! Bloom + ARC `has` cache.
//!
//! Answers negative `has` queries without touching the wrapped store. The
//! Bloom filter is populated by a one-shot rebuild over `all_keys()` and is
//! bypassed until that rebuild completes. A small ARC remembers recent
//! `has` answers in both directions.
//!
//! The Bloom filter is never cleared on delete; a deleted CID only costs
//! one probe of the inner store until the next rebuild.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bx_telemetry::metric_inc;
use bx_telemetry::metrics::CACHE_LOOKUPS;
use parking_lot::Mutex;
use shared_types::{is_empty_cid, Block, Cid};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::arc::ArcCache;
use crate::domain::bloom_filter::AtomicBloomFilter;
use crate::domain::config::CacheOpts;
use crate::domain::errors::BlockstoreError;
use crate::ports::inbound::{AllKeys, Blockstore, Result};

/// Counters for cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BloomCacheStats {
    /// Queries answered "absent" by the Bloom filter.
    pub bloom_negatives: u64,
    /// Queries answered by the ARC.
    pub arc_hits: u64,
    /// Queries that had to reach the inner store.
    pub misses: u64,
}

#[derive(Default)]
struct Counters {
    bloom_negatives: AtomicU64,
    arc_hits: AtomicU64,
    misses: AtomicU64,
}

pub struct BloomCache<B: Blockstore> {
    inner: B,
    bloom: Option<AtomicBloomFilter>,
    active: AtomicBool,
    arc: Option<Mutex<ArcCache<Cid, bool>>>,
    counters: Counters,
    rebuilt: watch::Sender<bool>,
}

impl<B: Blockstore + 'static> BloomCache<B> {
    /// Wrap `inner` and start the Bloom rebuild in the background.
    ///
    /// The rebuild runs on the blocking pool of the current tokio runtime,
    /// or on a dedicated thread when called outside a runtime. Cancelling
    /// `cancel` stops the rebuild and leaves the Bloom filter inactive.
    pub fn new(inner: B, opts: &CacheOpts, cancel: CancellationToken) -> Arc<Self> {
        let bloom = opts.bloom_enabled().then(|| {
            AtomicBloomFilter::with_bytes(opts.has_bloom_filter_size, opts.has_bloom_filter_hashes)
        });
        let arc = (opts.has_arc_cache_size > 0)
            .then(|| Mutex::new(ArcCache::new(opts.has_arc_cache_size)));
        let (rebuilt, _) = watch::channel(false);

        let cache = Arc::new(Self {
            inner,
            bloom,
            active: AtomicBool::new(false),
            arc,
            counters: Counters::default(),
            rebuilt,
        });

        if cache.bloom.is_none() {
            cache.rebuilt.send_replace(true);
            return cache;
        }

        let worker = Arc::clone(&cache);
        let job = move || worker.rebuild(&cancel);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                if let Err(e) = std::thread::Builder::new()
                    .name("bloom-rebuild".into())
                    .spawn(job)
                {
                    warn!(error = %e, "[bloom] could not spawn rebuild thread, filter stays inactive");
                    cache.rebuilt.send_replace(true);
                }
            }
        }
        cache
    }
}

impl<B: Blockstore> BloomCache<B> {
    fn rebuild(&self, cancel: &CancellationToken) {
        let Some(bloom) = &self.bloom else {
            return;
        };

        match self.inner.all_keys(cancel) {
            Ok(keys) => {
                let mut count = 0usize;
                for cid in keys {
                    bloom.add(cid.hash().digest());
                    count += 1;
                }
                if cancel.is_cancelled() {
                    warn!(inserted = count, "[bloom] rebuild canceled, filter stays inactive");
                } else {
                    self.active.store(true, Ordering::Release);
                    info!(
                        keys = count,
                        fpr = bloom.estimated_fpr(),
                        "[bloom] rebuild finished"
                    );
                }
            }
            Err(e) => warn!(error = %e, "[bloom] rebuild failed, filter stays inactive"),
        }
        self.rebuilt.send_replace(true);
    }

    /// Whether the Bloom filter is answering queries.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Wait for the rebuild to finish. Returns whether the filter is active.
    pub async fn wait_active(&self) -> bool {
        let mut rx = self.rebuilt.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done).await;
        self.is_active()
    }

    /// Receiver flipping to `true` when the rebuild has finished.
    pub fn rebuild_signal(&self) -> watch::Receiver<bool> {
        self.rebuilt.subscribe()
    }

    /// `(has, conclusive)` from the caches alone.
    ///
    /// An inconclusive answer means the inner store must be asked.
    pub fn has_cached(&self, cid: &Cid) -> (bool, bool) {
        if is_empty_cid(cid) {
            return (false, false);
        }

        if self.is_active() {
            if let Some(bloom) = &self.bloom {
                if !bloom.has(cid.hash().digest()) {
                    self.counters.bloom_negatives.fetch_add(1, Ordering::Relaxed);
                    metric_inc!(CACHE_LOOKUPS, &["bloom", "hit"]);
                    return (false, true);
                }
            }
        }

        if let Some(arc) = &self.arc {
            if let Some(has) = arc.lock().get(cid) {
                self.counters.arc_hits.fetch_add(1, Ordering::Relaxed);
                metric_inc!(CACHE_LOOKUPS, &["has_arc", "hit"]);
                return (has, true);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metric_inc!(CACHE_LOOKUPS, &["has_arc", "miss"]);
        (false, false)
    }

    fn cache_has(&self, cid: &Cid, has: bool) {
        if let Some(arc) = &self.arc {
            arc.lock().add(*cid, has);
        }
    }

    /// Record the outcome of an inner lookup.
    fn cache_result<T>(&self, cid: &Cid, result: &Result<T>) {
        match result {
            Ok(_) => self.cache_has(cid, true),
            Err(BlockstoreError::NotFound) => self.cache_has(cid, false),
            Err(_) => {}
        }
    }

    fn add_to_bloom(&self, cid: &Cid) {
        if let Some(bloom) = &self.bloom {
            bloom.add(cid.hash().digest());
        }
    }

    pub fn stats(&self) -> BloomCacheStats {
        BloomCacheStats {
            bloom_negatives: self.counters.bloom_negatives.load(Ordering::Relaxed),
            arc_hits: self.counters.arc_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Blockstore> Blockstore for BloomCache<B> {
    fn has(&self, cid: &Cid) -> Result<bool> {
        if let (has, true) = self.has_cached(cid) {
            return Ok(has);
        }
        let result = self.inner.has(cid);
        if let Ok(has) = result {
            if !is_empty_cid(cid) {
                self.cache_has(cid, has);
            }
        }
        result
    }

    fn get(&self, cid: &Cid) -> Result<Block> {
        if let (false, true) = self.has_cached(cid) {
            return Err(BlockstoreError::NotFound);
        }
        let result = self.inner.get(cid);
        if !is_empty_cid(cid) {
            self.cache_result(cid, &result);
        }
        result
    }

    fn get_size(&self, cid: &Cid) -> Result<usize> {
        if let (false, true) = self.has_cached(cid) {
            return Err(BlockstoreError::NotFound);
        }
        let result = self.inner.get_size(cid);
        if !is_empty_cid(cid) {
            self.cache_result(cid, &result);
        }
        result
    }

    fn put(&self, block: Block) -> Result<()> {
        if let (true, true) = self.has_cached(block.cid()) {
            debug!(cid = %block.cid(), "[bloom] put skipped, block cached as present");
            return Ok(());
        }

        let cid = *block.cid();
        if !is_empty_cid(&cid) {
            self.add_to_bloom(&cid);
        }
        self.inner.put(block)?;
        self.cache_has(&cid, true);
        Ok(())
    }

    fn put_many(&self, blocks: Vec<Block>) -> Result<()> {
        let missing: Vec<Block> = blocks
            .into_iter()
            .filter(|b| self.has_cached(b.cid()) != (true, true))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let cids: Vec<Cid> = missing.iter().map(|b| *b.cid()).collect();
        for cid in cids.iter().filter(|c| !is_empty_cid(c)) {
            self.add_to_bloom(cid);
        }
        self.inner.put_many(missing)?;
        for cid in &cids {
            self.cache_has(cid, true);
        }
        Ok(())
    }

    fn delete(&self, cid: &Cid) -> Result<()> {
        if let Some(arc) = &self.arc {
            arc.lock().remove(cid);
        }
        let result = self.inner.delete(cid);
        match &result {
            Ok(()) | Err(BlockstoreError::NotFound) if !is_empty_cid(cid) => {
                self.cache_has(cid, false)
            }
            _ => {}
        }
        result
    }

    fn all_keys(&self, cancel: &CancellationToken) -> Result<AllKeys> {
        self.inner.all_keys(cancel)
    }

    fn hash_on_read(&self, enabled: bool) {
        self.inner.hash_on_read(enabled);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::service::base::BaseBlockstore;
    use shared_types::test_utils::{random_block, random_blocks, raw_block, CountingDatastore};
    use shared_types::{MemoryDatastore, Multihash};

    type Counting = Arc<CountingDatastore<MemoryDatastore>>;

    fn base() -> (Counting, Arc<BaseBlockstore<Counting>>) {
        let ds = Arc::new(CountingDatastore::new(MemoryDatastore::new()));
        (ds.clone(), Arc::new(BaseBlockstore::new(ds)))
    }

    // =========================================================================
    // Rebuild
    // =========================================================================

    #[tokio::test]
    async fn test_rebuild_activates_filter() {
        let (_, bs) = base();
        bs.put_many(random_blocks(10, 32)).unwrap();

        let cache = BloomCache::new(bs, &CacheOpts::default(), CancellationToken::new());

        assert!(cache.wait_active().await);
    }

    #[tokio::test]
    async fn test_canceled_rebuild_stays_inactive() {
        let (_, bs) = base();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let cache = BloomCache::new(bs, &CacheOpts::default(), cancel);

        assert!(!cache.wait_active().await);
        // Queries still work, answered by the inner store.
        assert!(!cache.has(raw_block("x").cid()).unwrap());
    }

    #[test]
    fn test_rebuild_outside_runtime_uses_thread() {
        let (_, bs) = base();
        let stored = random_block(16);
        bs.put(stored.clone()).unwrap();

        let cache = BloomCache::new(bs, &CacheOpts::default(), CancellationToken::new());

        let mut waited = 0;
        while !cache.is_active() && waited < 200 {
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert!(cache.is_active());
        assert!(cache.has(stored.cid()).unwrap());
    }

    // =========================================================================
    // Negative answers
    // =========================================================================

    #[tokio::test]
    async fn test_absent_queries_short_circuit() {
        let (ds, bs) = base();
        bs.put_many(random_blocks(1000, 16)).unwrap();
        let opts = CacheOpts {
            has_arc_cache_size: 0,
            ..CacheOpts::default()
        };
        let cache = BloomCache::new(bs, &opts, CancellationToken::new());
        assert!(cache.wait_active().await);
        ds.reset();

        for block in random_blocks(1000, 16) {
            assert!(!cache.has(block.cid()).unwrap());
        }

        // At least 95% answered without a datastore probe.
        assert!(ds.has_calls() <= 50, "probes: {}", ds.has_calls());
        assert!(cache.stats().bloom_negatives >= 950);
    }

    #[tokio::test]
    async fn test_get_short_circuits_to_not_found() {
        let (ds, bs) = base();
        let cache = BloomCache::new(bs, &CacheOpts::default(), CancellationToken::new());
        cache.wait_active().await;
        ds.reset();

        let absent = raw_block("never stored");
        assert_eq!(cache.get(absent.cid()), Err(BlockstoreError::NotFound));
        assert_eq!(ds.gets(), 0);
    }

    // =========================================================================
    // Writes
    // =========================================================================

    #[tokio::test]
    async fn test_put_updates_filter_and_arc() {
        let (ds, bs) = base();
        let cache = BloomCache::new(bs, &CacheOpts::default(), CancellationToken::new());
        cache.wait_active().await;

        let block = raw_block("fresh");
        cache.put(block.clone()).unwrap();
        assert_eq!(cache.has_cached(block.cid()), (true, true));

        // Second put is absorbed by the ARC.
        ds.reset();
        cache.put(block.clone()).unwrap();
        assert_eq!(ds.puts() + ds.has_calls(), 0);

        assert_eq!(cache.get(block.cid()).unwrap(), block);
    }

    #[tokio::test]
    async fn test_delete_caches_absence() {
        let (ds, bs) = base();
        let cache = BloomCache::new(bs, &CacheOpts::default(), CancellationToken::new());
        cache.wait_active().await;

        let block = raw_block("short lived");
        cache.put(block.clone()).unwrap();
        cache.delete(block.cid()).unwrap();

        ds.reset();
        assert!(!cache.has(block.cid()).unwrap());
        assert_eq!(ds.has_calls(), 0);

        // A second delete reaches the inner store and reports NotFound.
        assert_eq!(cache.delete(block.cid()), Err(BlockstoreError::NotFound));
    }

    #[tokio::test]
    async fn test_empty_cid_is_inconclusive() {
        let (_, bs) = base();
        let cache = BloomCache::new(bs, &CacheOpts::default(), CancellationToken::new());
        cache.wait_active().await;

        let empty = Cid::new_v1(
            shared_types::RAW,
            Multihash::wrap(shared_types::IDENTITY, &[]).unwrap(),
        );
        assert_eq!(cache.has_cached(&empty), (false, false));
        assert_eq!(cache.get(&empty), Err(BlockstoreError::NotFound));
        assert!(!cache.has(&empty).unwrap());
    }
}
