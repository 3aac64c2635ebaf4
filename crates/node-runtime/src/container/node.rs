//! # Node Container
//!
//! Builds every subsystem from a [`NodeConfig`] and owns them for the life
//! of the node.
//!
//! ## Initialization Order
//!
//! 1. Validate configuration
//! 2. Open the datastore
//! 3. Blockstore with its cache layers (Bloom rebuild starts in background)
//! 4. Exchange, when a network is supplied and the node is not offline
//! 5. Block service over blockstore and exchange
//! 6. Pinner, restored from the datastore, resolving links through the
//!    block service
//! 7. Reprovider loop

use std::sync::Arc;

use bx_01_blockstore::{cached_blockstore, BaseBlockstore, Blockstore, CachedBlockstore, GcLocker};
use bx_02_pinning::{collect, GarbageCollector, GcError, OfflineLinks, PinError, Pinner};
use bx_03_providers::{key_chooser, ProviderError, Reprovider};
use bx_04_exchange::{Bitswap, BitswapNetwork, Exchange};
use bx_05_block_service::BlockService;
use parking_lot::Mutex;
use shared_types::{Cid, ContentRouting, Datastore, DatastoreError, LinkSource, PeerId};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::{ConfigError, NodeConfig};
use crate::adapters::open_datastore;

/// Node startup and shutdown errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error(transparent)]
    Pin(#[from] PinError),
}

/// A running node.
pub struct Node {
    config: NodeConfig,
    datastore: Arc<dyn Datastore>,
    cached: CachedBlockstore,
    blockstore: Arc<dyn Blockstore>,
    locker: GcLocker,
    bitswap: Option<Arc<Bitswap>>,
    block_service: Arc<BlockService>,
    pinner: Arc<Pinner>,
    reprovider: Arc<Reprovider>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Wire every subsystem and start the background loops.
    ///
    /// Without a `network`, or with `offline` set, the node serves local
    /// blocks only and the reprovider stays idle.
    pub async fn start(
        config: NodeConfig,
        network: Option<Arc<dyn BitswapNetwork>>,
        routing: Arc<dyn ContentRouting>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let cancel = CancellationToken::new();

        let datastore = open_datastore(&config.datastore)?;
        let base = BaseBlockstore::new(Arc::clone(&datastore));
        base.hash_on_read(config.hash_on_read);
        let cached = cached_blockstore(base, &config.cache, cancel.child_token()).map_err(ConfigError::from)?;
        let blockstore = cached.as_dyn();
        let locker = GcLocker::new();

        let bitswap = match network {
            Some(network) if !config.offline => Some(
                Bitswap::new(
                    config.exchange.clone(),
                    network,
                    Arc::clone(&routing),
                    Arc::clone(&blockstore),
                )
                .map_err(ConfigError::from)?,
            ),
            _ => None,
        };
        let exchange = bitswap.clone().map(|b| b as Arc<dyn Exchange>);

        let block_service = Arc::new(
            BlockService::new(Arc::clone(&blockstore), exchange)
                .with_locker(locker.clone())
                .with_filestore(Arc::clone(&datastore))
                .check_first(config.check_first),
        );

        let links: Arc<dyn LinkSource> = block_service.clone();
        let pinner = Arc::new(Pinner::load(Arc::clone(&datastore), links, locker.clone())?);

        // Reproviding walks local blocks only.
        let local_links: Arc<dyn LinkSource> = Arc::new(OfflineLinks::new(Arc::clone(&blockstore)));
        let chooser = key_chooser(
            config.reprovider.strategy,
            Arc::clone(&blockstore),
            Arc::clone(&pinner),
            local_links,
        );
        let reprovider = Arc::new(Reprovider::new(routing, chooser, &config.reprovider));

        let mut tasks = Vec::new();
        if bitswap.is_some() {
            let loop_handle = Arc::clone(&reprovider);
            let token = cancel.child_token();
            tasks.push(tokio::spawn(async move { loop_handle.run(token).await }));
        }

        info!(
            backend = %config.datastore.backend,
            online = bitswap.is_some(),
            peer = ?bitswap.as_ref().map(|b| b.local_peer().to_string()),
            strategy = %config.reprovider.strategy,
            "[node] started"
        );

        Ok(Self {
            config,
            datastore,
            cached,
            blockstore,
            locker,
            bitswap,
            block_service,
            pinner,
            reprovider,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The exchange's peer id, if the node is online.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.bitswap.as_ref().map(|b| b.local_peer().clone())
    }

    pub fn is_online(&self) -> bool {
        self.bitswap.is_some()
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// The cached blockstore stack.
    pub fn blockstore(&self) -> &Arc<dyn Blockstore> {
        &self.blockstore
    }

    pub fn block_service(&self) -> &Arc<BlockService> {
        &self.block_service
    }

    pub fn pinner(&self) -> &Arc<Pinner> {
        &self.pinner
    }

    pub fn bitswap(&self) -> Option<&Arc<Bitswap>> {
        self.bitswap.as_ref()
    }

    pub fn locker(&self) -> &GcLocker {
        &self.locker
    }

    /// Wait for the Bloom filter rebuild started at boot.
    pub async fn wait_ready(&self) {
        self.cached.wait_ready().await;
    }

    /// Run one reprovide cycle now.
    pub async fn reprovide(&self) -> Result<usize, ProviderError> {
        self.reprovider.reprovide(&self.cancel).await
    }

    /// Collect garbage, keeping pinned blocks and the configured
    /// best-effort roots. Returns the removed CIDs.
    pub async fn gc(&self) -> Result<Vec<Cid>, GcError> {
        let collector = GarbageCollector::new(
            Arc::clone(&self.blockstore),
            Arc::clone(&self.pinner),
            self.locker.clone(),
        );
        let results = collector.run(self.config.gc.best_effort_roots.clone(), self.cancel.child_token());
        let removed = collect(results).await?;
        info!(removed = removed.len(), "[node] garbage collection finished");
        Ok(removed)
    }

    /// Stop every loop, close the exchange and persist state.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        info!("[node] shutting down");
        self.block_service.close().await;
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "[node] background task failed");
            }
        }

        self.pinner.flush()?;
        self.datastore.sync()?;
        info!("[node] shutdown complete");
        Ok(())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use bx_01_blockstore::BlockstoreError;
    use shared_types::test_utils::{dag_node, raw_block};
    use shared_types::NullRouting;

    use super::*;
    use crate::container::config::DatastoreBackend;

    async fn offline_node(config: NodeConfig) -> Node {
        Node::start(config, None, Arc::new(NullRouting)).await.unwrap()
    }

    #[tokio::test]
    async fn test_offline_node_round_trip() {
        let node = offline_node(NodeConfig::default()).await;
        node.wait_ready().await;
        assert!(!node.is_online());
        assert!(node.peer_id().is_none());

        let block = raw_block("beep boop");
        let cid = node.block_service().add_block(block.clone()).await.unwrap();
        let fetched = node
            .block_service()
            .get_block(&cid, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetched.data(), block.data());

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_refused() {
        let mut config = NodeConfig::default();
        config.exchange.task_workers = 0;
        let result = Node::start(config, None, Arc::new(NullRouting)).await;
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[tokio::test]
    async fn test_gc_keeps_pinned_dag() {
        let node = offline_node(NodeConfig::default()).await;
        let leaf1 = raw_block("leaf one");
        let leaf2 = raw_block("leaf two");
        let root = dag_node("root", &[&leaf1, &leaf2]);
        let loose = raw_block("unrelated");
        let service = node.block_service();
        service
            .add_blocks(vec![leaf1.clone(), leaf2.clone(), root.clone(), loose.clone()])
            .await
            .unwrap();
        node.pinner().pin(root.cid(), true).await.unwrap();

        let removed = node.gc().await.unwrap();
        assert_eq!(removed, vec![*loose.cid()]);
        for kept in [&root, &leaf1, &leaf2] {
            assert!(node.blockstore().get(kept.cid()).is_ok());
        }
        assert_eq!(node.blockstore().get(loose.cid()), Err(BlockstoreError::NotFound));
    }

    #[tokio::test]
    async fn test_pins_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.datastore.backend = DatastoreBackend::File;
        config.datastore.path = dir.path().join("node.db");

        let block = raw_block("keep me");
        {
            let node = offline_node(config.clone()).await;
            node.block_service().add_block(block.clone()).await.unwrap();
            node.pinner().pin(block.cid(), false).await.unwrap();
            node.shutdown().await.unwrap();
        }

        let node = offline_node(config).await;
        assert_eq!(node.pinner().direct_keys(), vec![*block.cid()]);
        assert!(node.blockstore().has(block.cid()).unwrap());
    }

    #[tokio::test]
    async fn test_reprovide_offline_announces_all_blocks() {
        let node = offline_node(NodeConfig::default()).await;
        node.block_service()
            .add_blocks(vec![raw_block("a"), raw_block("b")])
            .await
            .unwrap();
        assert_eq!(node.reprovide().await.unwrap(), 2);
    }
}
