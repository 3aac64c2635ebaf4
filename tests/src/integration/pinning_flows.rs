//! # Pinning Flows
//!
//! Garbage collection against the pin sets:
//!
//! - a recursive pin protects its whole DAG
//! - a direct pin protects only its root
//! - a pin made on one node fetches missing children from a peer

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bx_01_blockstore::{Blockstore, BlockstoreError, GcLocker};
    use bx_02_pinning::{collect, GarbageCollector, OfflineLinks, Pinner};
    use node_runtime::testnet::Testnet;
    use node_runtime::NodeConfig;
    use shared_types::test_utils::{dag_node, raw_block};
    use shared_types::{Datastore, LinkSource, MemoryDatastore};
    use tokio_util::sync::CancellationToken;

    use crate::fixtures::{leecher_config, memory_blockstore, within, STEP_TIMEOUT};

    fn pinner_over(blockstore: &Arc<dyn Blockstore>, locker: &GcLocker) -> Arc<Pinner> {
        let datastore: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let links: Arc<dyn LinkSource> = Arc::new(OfflineLinks::new(Arc::clone(blockstore)));
        Arc::new(Pinner::new(datastore, links, locker.clone()))
    }

    #[tokio::test]
    async fn test_gc_respects_recursive_pin() {
        let blockstore = memory_blockstore();
        let locker = GcLocker::new();
        let pinner = pinner_over(&blockstore, &locker);

        let l1 = raw_block("leaf one");
        let l2 = raw_block("leaf two");
        let root = dag_node("root", &[&l1, &l2]);
        let unrelated = raw_block("unrelated");
        blockstore
            .put_many(vec![l1.clone(), l2.clone(), root.clone()])
            .unwrap();
        pinner.pin(root.cid(), true).await.unwrap();
        blockstore.put(unrelated.clone()).unwrap();

        let gc = GarbageCollector::new(Arc::clone(&blockstore), Arc::clone(&pinner), locker);
        let removed = collect(gc.run(Vec::new(), CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(removed, vec![*unrelated.cid()]);
        assert_eq!(blockstore.get(unrelated.cid()), Err(BlockstoreError::NotFound));
        for kept in [&root, &l1, &l2] {
            assert_eq!(blockstore.get(kept.cid()).unwrap(), *kept);
        }
    }

    #[tokio::test]
    async fn test_direct_pin_keeps_root_only() {
        let blockstore = memory_blockstore();
        let locker = GcLocker::new();
        let pinner = pinner_over(&blockstore, &locker);

        let child = raw_block("child");
        let root = dag_node("root", &[&child]);
        blockstore.put_many(vec![child.clone(), root.clone()]).unwrap();
        pinner.pin(root.cid(), false).await.unwrap();

        let gc = GarbageCollector::new(Arc::clone(&blockstore), pinner, locker);
        let removed = collect(gc.run(Vec::new(), CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(removed, vec![*child.cid()]);
        assert!(blockstore.has(root.cid()).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_recursive_pin_fetches_children_from_peer() {
        let net = Testnet::new();
        let seeder = net.spawn_node("seeder", NodeConfig::default()).await.unwrap();
        let pinner_node = net.spawn_node("pinner", leecher_config()).await.unwrap();
        net.connect(&seeder, &pinner_node).await.unwrap();

        let l1 = raw_block("remote leaf one");
        let l2 = raw_block("remote leaf two");
        let root = dag_node("remote root", &[&l1, &l2]);
        seeder
            .block_service()
            .add_blocks(vec![l1.clone(), l2.clone(), root.clone()])
            .await
            .unwrap();

        // Only the root is local; the pin walk pulls the rest.
        pinner_node.blockstore().put(root.clone()).unwrap();
        within(
            STEP_TIMEOUT,
            "recursive pin",
            pinner_node.pinner().pin(root.cid(), true),
        )
        .await
        .unwrap();

        for block in [&l1, &l2] {
            assert!(pinner_node.blockstore().has(block.cid()).unwrap());
        }
        let removed = pinner_node.gc().await.unwrap();
        assert!(removed.is_empty());
    }
}
