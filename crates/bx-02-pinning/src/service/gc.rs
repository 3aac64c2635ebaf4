//! Mark-and-sweep garbage collector.
//!
//! 1. Take the exclusive GC lock.
//! 2. Mark: recursive pins and internal pins strictly, best-effort roots
//!    tolerantly, direct pins without descending.
//! 3. Sweep: delete every stored CID outside the marked set, streaming
//!    each removal (or failure) to the caller.
//!
//! A strict marking failure aborts before anything is deleted.

use std::sync::Arc;

use bx_01_blockstore::{Blockstore, BlockstoreError, GcLocker};
use bx_telemetry::metrics::{GC_BLOCKS_REMOVED, GC_DURATION};
use bx_telemetry::{metric_add, time_histogram};
use shared_types::{Cid, LinkSource};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::OfflineLinks;
use crate::domain::coloring::{ColoredSet, Strictness};
use crate::domain::errors::{GcError, GcResult};
use crate::service::pinner::Pinner;

const OUTPUT_BUFFER: usize = 128;

#[derive(Clone)]
pub struct GarbageCollector {
    blockstore: Arc<dyn Blockstore>,
    pinner: Arc<Pinner>,
    links: Arc<dyn LinkSource>,
    locker: GcLocker,
}

impl GarbageCollector {
    /// Collector resolving links from `blockstore` only.
    pub fn new(blockstore: Arc<dyn Blockstore>, pinner: Arc<Pinner>, locker: GcLocker) -> Self {
        let links = Arc::new(OfflineLinks::new(blockstore.clone()));
        Self {
            blockstore,
            pinner,
            links,
            locker,
        }
    }

    /// Replace the link source used while marking.
    #[must_use]
    pub fn with_link_source(mut self, links: Arc<dyn LinkSource>) -> Self {
        self.links = links;
        self
    }

    /// Start a collection. Removed CIDs and errors arrive on the returned
    /// channel, which closes when the run ends.
    ///
    /// Must be called within a tokio runtime.
    pub fn run(
        &self,
        best_effort_roots: Vec<Cid>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<GcResult> {
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let gc = self.clone();
        tokio::spawn(async move {
            gc.collect_garbage(best_effort_roots, cancel, tx).await;
        });
        rx
    }

    async fn collect_garbage(
        &self,
        best_effort_roots: Vec<Cid>,
        cancel: CancellationToken,
        output: mpsc::Sender<GcResult>,
    ) {
        let _timer = time_histogram!(GC_DURATION);

        let _guard = tokio::select! {
            guard = self.locker.gc_lock() => guard,
            _ = cancel.cancelled() => return,
        };

        let marked = match self.colored_set(&best_effort_roots, &output).await {
            Ok(marked) => marked,
            Err(e) => {
                warn!(error = %e, "[gc] marking failed, nothing deleted");
                let _ = output.send(Err(e)).await;
                return;
            }
        };

        let keys = match self.blockstore.all_keys(&cancel) {
            Ok(keys) => keys,
            Err(e) => {
                let _ = output.send(Err(GcError::Blockstore(e))).await;
                return;
            }
        };

        let mut removed = 0u64;
        let mut failed = false;
        for cid in keys {
            if cancel.is_cancelled() {
                break;
            }
            if marked.contains(&cid) {
                continue;
            }
            match self.blockstore.delete(&cid) {
                Ok(()) => {
                    removed += 1;
                    let _ = output.send(Ok(cid)).await;
                }
                // Removed concurrently; nothing left to collect.
                Err(BlockstoreError::NotFound) => {}
                Err(e) => {
                    failed = true;
                    warn!(cid = %cid, error = %e, "[gc] could not remove block");
                    let _ = output
                        .send(Err(GcError::CannotDeleteBlock {
                            cid,
                            reason: e.to_string(),
                        }))
                        .await;
                }
            }
        }

        metric_add!(GC_BLOCKS_REMOVED, removed as f64);
        info!(
            removed,
            kept = marked.len(),
            canceled = cancel.is_cancelled(),
            "[gc] sweep finished"
        );
        if failed {
            let _ = output.send(Err(GcError::CannotDeleteSomeBlocks)).await;
        }
    }

    async fn colored_set(
        &self,
        best_effort_roots: &[Cid],
        output: &mpsc::Sender<GcResult>,
    ) -> Result<ColoredSet, GcError> {
        let mut marked = ColoredSet::new();
        let links = self.links.as_ref();

        for strict_roots in [self.pinner.recursive_keys(), self.pinner.internal_pins()] {
            if let Err((cid, e)) = marked.mark(&strict_roots, links, Strictness::Strict).await {
                let _ = output
                    .send(Err(GcError::CannotFetchLinks {
                        cid,
                        reason: e.to_string(),
                    }))
                    .await;
                return Err(GcError::CannotFetchAllLinks);
            }
        }

        // Best-effort marking never fails.
        let _ = marked
            .mark(best_effort_roots, links, Strictness::BestEffort)
            .await;

        for cid in self.pinner.direct_keys() {
            marked.add(&cid);
        }
        Ok(marked)
    }
}

/// Drain a GC run. Returns every removed CID, or the first error once the
/// run has ended.
pub async fn collect(mut results: mpsc::Receiver<GcResult>) -> Result<Vec<Cid>, GcError> {
    let mut removed = Vec::new();
    let mut first_error = None;
    while let Some(result) = results.recv().await {
        match result {
            Ok(cid) => removed.push(cid),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bx_01_blockstore::BaseBlockstore;
    use shared_types::test_utils::{dag_node, random_blocks, raw_block};
    use shared_types::MemoryDatastore;

    struct Fixture {
        blockstore: Arc<dyn Blockstore>,
        pinner: Arc<Pinner>,
        gc: GarbageCollector,
        locker: GcLocker,
    }

    fn fixture() -> Fixture {
        let datastore = Arc::new(MemoryDatastore::new());
        let blockstore: Arc<dyn Blockstore> = Arc::new(BaseBlockstore::new(datastore.clone()));
        let locker = GcLocker::new();
        let links = Arc::new(OfflineLinks::new(blockstore.clone()));
        let pinner = Arc::new(Pinner::new(datastore, links, locker.clone()));
        let gc = GarbageCollector::new(blockstore.clone(), pinner.clone(), locker.clone());
        Fixture {
            blockstore,
            pinner,
            gc,
            locker,
        }
    }

    #[tokio::test]
    async fn test_gc_keeps_recursive_dag_and_removes_unpinned() {
        let f = fixture();
        let l1 = raw_block("L1");
        let l2 = raw_block("L2");
        let root = dag_node("R", &[&l1, &l2]);
        let unrelated = raw_block("U");
        f.blockstore
            .put_many(vec![l1.clone(), l2.clone(), root.clone(), unrelated.clone()])
            .unwrap();
        f.pinner.pin(root.cid(), true).await.unwrap();

        let removed = collect(f.gc.run(vec![], CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(removed, vec![*unrelated.cid()]);
        for kept in [&root, &l1, &l2] {
            assert_eq!(f.blockstore.get(kept.cid()).unwrap(), *kept);
        }
        assert!(!f.blockstore.has(unrelated.cid()).unwrap());
    }

    #[tokio::test]
    async fn test_direct_pins_and_best_effort_roots_survive() {
        let f = fixture();
        let direct = raw_block("direct");
        let leaf = raw_block("leaf under best effort");
        let best_effort = dag_node("best effort", &[&leaf]);
        let doomed = random_blocks(5, 32);
        f.blockstore
            .put_many(vec![direct.clone(), leaf.clone(), best_effort.clone()])
            .unwrap();
        f.blockstore.put_many(doomed.clone()).unwrap();
        f.pinner.pin(direct.cid(), false).await.unwrap();

        let removed = collect(f.gc.run(vec![*best_effort.cid()], CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(removed.len(), doomed.len());
        assert!(f.blockstore.has(direct.cid()).unwrap());
        assert!(f.blockstore.has(leaf.cid()).unwrap());
        assert!(f.blockstore.has(best_effort.cid()).unwrap());
    }

    #[tokio::test]
    async fn test_best_effort_root_with_missing_child_is_tolerated() {
        let f = fixture();
        let missing = raw_block("gone");
        let root = dag_node("partial", &[&missing]);
        let doomed = raw_block("doomed");
        f.blockstore
            .put_many(vec![root.clone(), doomed.clone()])
            .unwrap();

        let removed = collect(f.gc.run(vec![*root.cid()], CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(removed, vec![*doomed.cid()]);
        assert!(f.blockstore.has(root.cid()).unwrap());
    }

    #[tokio::test]
    async fn test_strict_failure_deletes_nothing() {
        let f = fixture();
        let leaf = raw_block("leaf");
        let root = dag_node("root", &[&leaf]);
        let doomed = raw_block("would be removed");
        f.blockstore
            .put_many(vec![leaf.clone(), root.clone(), doomed.clone()])
            .unwrap();
        f.pinner.pin(root.cid(), true).await.unwrap();
        // Lose part of the pinned DAG behind the pinner's back.
        f.blockstore.delete(leaf.cid()).unwrap();

        let mut rx = f.gc.run(vec![], CancellationToken::new());
        let mut errors = Vec::new();
        while let Some(result) = rx.recv().await {
            errors.push(result.unwrap_err());
        }

        assert_eq!(
            errors,
            vec![
                GcError::CannotFetchLinks {
                    cid: *leaf.cid(),
                    reason: shared_types::DagError::NotFound { cid: *leaf.cid() }.to_string(),
                },
                GcError::CannotFetchAllLinks,
            ]
        );
        assert!(f.blockstore.has(doomed.cid()).unwrap());
    }

    #[tokio::test]
    async fn test_gc_waits_for_pin_lock() {
        let f = fixture();
        let doomed = raw_block("doomed");
        f.blockstore.put(doomed.clone()).unwrap();

        let writer = f.locker.pin_lock().await;
        let mut rx = f.gc.run(vec![], CancellationToken::new());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(f.locker.gc_requested());
        assert!(f.blockstore.has(doomed.cid()).unwrap());

        drop(writer);
        assert_eq!(rx.recv().await, Some(Ok(*doomed.cid())));
    }

    #[tokio::test]
    async fn test_canceled_while_waiting_does_nothing() {
        let f = fixture();
        let doomed = raw_block("doomed");
        f.blockstore.put(doomed.clone()).unwrap();
        let _writer = f.locker.pin_lock().await;

        let cancel = CancellationToken::new();
        let rx = f.gc.run(vec![], cancel.clone());
        cancel.cancel();

        assert_eq!(collect(rx).await, Ok(vec![]));
        assert!(f.blockstore.has(doomed.cid()).unwrap());
    }
}
