//! # Block Service
//!
//! Reads go to the local blockstore first and fall back to the exchange;
//! writes go to the blockstore and are then announced to the exchange.
//!
//! ```text
//! get:  local ──hit──► done
//!         └──miss──► exchange ──block──► done
//!                        ├──cancel──► Canceled
//!                        └──error───► Exchange(..)
//!
//! put:  verify ─► pin lock ─► blockstore.put ─► exchange.has_block
//! ```
//!
//! Without an exchange the service is offline and a missing block is
//! [`BlockServiceError::NotFound`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bx_01_blockstore::{Blockstore, BlockstoreError, GcLocker};
use bx_04_exchange::{BlockStream, Exchange};
use bx_telemetry::log_block_event;
use futures::{stream, StreamExt};
use shared_types::{links, Block, BlockKind, Cid, DagError, Datastore, DatastoreError, LinkSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::session::BlockSession;
use crate::domain::errors::{BlockServiceError, Result};
use crate::domain::filestore::{filestore_key, FilestoreRef};

/// How long a link lookup may wait on the exchange.
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BlockService {
    blockstore: Arc<dyn Blockstore>,
    exchange: Option<Arc<dyn Exchange>>,
    filestore: Option<Arc<dyn Datastore>>,
    locker: GcLocker,
    check_first: bool,
    link_timeout: Duration,
}

impl BlockService {
    /// A service over `blockstore`; offline when `exchange` is `None`.
    pub fn new(blockstore: Arc<dyn Blockstore>, exchange: Option<Arc<dyn Exchange>>) -> Self {
        Self {
            blockstore,
            exchange,
            filestore: None,
            locker: GcLocker::new(),
            check_first: false,
            link_timeout: DEFAULT_LINK_TIMEOUT,
        }
    }

    /// Share the GC locker so writes exclude garbage collection.
    pub fn with_locker(mut self, locker: GcLocker) -> Self {
        self.locker = locker;
        self
    }

    /// Datastore holding filestore references.
    pub fn with_filestore(mut self, datastore: Arc<dyn Datastore>) -> Self {
        self.filestore = Some(datastore);
        self
    }

    /// Skip writes (and announcements) for blocks already stored.
    pub fn check_first(mut self, enabled: bool) -> Self {
        self.check_first = enabled;
        self
    }

    pub fn with_link_timeout(mut self, timeout: Duration) -> Self {
        self.link_timeout = timeout;
        self
    }

    pub fn blockstore(&self) -> &Arc<dyn Blockstore> {
        &self.blockstore
    }

    pub fn exchange(&self) -> Option<&Arc<dyn Exchange>> {
        self.exchange.as_ref()
    }

    pub fn is_online(&self) -> bool {
        self.exchange.is_some()
    }

    /// Store `block` and announce it.
    pub async fn add_block(&self, block: Block) -> Result<Cid> {
        let cid = *block.cid();
        self.check_block(&block)?;

        {
            let _guard = self.locker.pin_lock().await;
            if self.check_first && self.blockstore.has(&cid)? {
                debug!(cid = %cid, "[blockservice] block already stored");
                return Ok(cid);
            }
            self.blockstore.put(block.clone())?;
            self.record_filestore_ref(&block)?;
        }

        log_block_event!(debug, "blockservice", "block added", cid);
        self.announce(&block).await;
        Ok(cid)
    }

    /// Store `blocks` in one batch and announce them.
    pub async fn add_blocks(&self, blocks: Vec<Block>) -> Result<Vec<Cid>> {
        for block in &blocks {
            self.check_block(block)?;
        }
        let cids: Vec<Cid> = blocks.iter().map(|b| *b.cid()).collect();

        let fresh = {
            let _guard = self.locker.pin_lock().await;
            let mut seen = HashSet::new();
            let mut fresh = Vec::with_capacity(blocks.len());
            for block in blocks {
                if !seen.insert(*block.cid()) {
                    continue;
                }
                if self.check_first && self.blockstore.has(block.cid())? {
                    continue;
                }
                fresh.push(block);
            }
            if !fresh.is_empty() {
                self.blockstore.put_many(fresh.clone())?;
            }
            for block in &fresh {
                self.record_filestore_ref(block)?;
            }
            fresh
        };

        debug!(added = fresh.len(), requested = cids.len(), "[blockservice] blocks added");
        for block in &fresh {
            self.announce(block).await;
        }
        Ok(cids)
    }

    /// Local block, or one fetched through the exchange.
    pub async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block> {
        get_block(&self.blockstore, self.exchange.as_deref(), cid, cancel).await
    }

    /// Stream the blocks for `cids`. Local blocks come first. Offline, CIDs
    /// that are not stored are skipped.
    pub async fn get_blocks(&self, cids: Vec<Cid>, cancel: CancellationToken) -> Result<BlockStream> {
        let exchange = self.exchange.clone();
        get_blocks(&self.blockstore, cids, cancel, |missing, cancel| async move {
            match exchange {
                Some(exchange) => exchange.get_blocks(missing, cancel).await.map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    pub fn has_block(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blockstore.has(cid)?)
    }

    /// Remove a block and its filestore reference.
    pub async fn delete_block(&self, cid: &Cid) -> Result<()> {
        let _guard = self.locker.pin_lock().await;
        self.blockstore.delete(cid)?;
        if let Some(filestore) = &self.filestore {
            match filestore.delete(&filestore_key(cid)) {
                Ok(()) | Err(DatastoreError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        log_block_event!(debug, "blockservice", "block deleted", cid);
        Ok(())
    }

    /// Where a filestore block's bytes live, if it is one.
    pub fn filestore_ref(&self, cid: &Cid) -> Result<Option<FilestoreRef>> {
        let Some(filestore) = &self.filestore else {
            return Ok(None);
        };
        match filestore.get(&filestore_key(cid)) {
            Ok(bytes) => FilestoreRef::decode(&bytes).map(Some),
            Err(DatastoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A session for fetching related blocks; ends with `cancel`.
    pub fn new_session(&self, cancel: CancellationToken) -> BlockSession {
        let session = self.exchange.as_ref().map(|e| e.new_session(cancel));
        BlockSession::new(self.blockstore.clone(), session)
    }

    pub async fn close(&self) {
        if let Some(exchange) = &self.exchange {
            exchange.close().await;
        }
    }

    fn check_block(&self, block: &Block) -> Result<()> {
        block.verify()?;
        match block.kind() {
            BlockKind::Raw => Ok(()),
            BlockKind::Protobuf => links(block)
                .map(|_| ())
                .map_err(|e| BlockServiceError::InvalidBlock(e.to_string())),
            BlockKind::Filestore { .. } if self.filestore.is_none() => {
                Err(BlockServiceError::FilestoreDisabled)
            }
            BlockKind::Filestore { .. } => Ok(()),
        }
    }

    fn record_filestore_ref(&self, block: &Block) -> Result<()> {
        let (BlockKind::Filestore { path, offset }, Some(filestore)) = (block.kind(), &self.filestore)
        else {
            return Ok(());
        };
        let reference = FilestoreRef {
            path: path.clone(),
            offset: *offset,
            size: block.len() as u64,
        };
        filestore.put(&filestore_key(block.cid()), reference.encode()?)?;
        Ok(())
    }

    async fn announce(&self, block: &Block) {
        let Some(exchange) = &self.exchange else {
            return;
        };
        if let Err(e) = exchange.has_block(block).await {
            warn!(cid = %block.cid(), error = %e, "[blockservice] exchange not notified of new block");
        }
    }
}

#[async_trait]
impl LinkSource for BlockService {
    async fn get_links(&self, cid: &Cid) -> std::result::Result<Vec<Cid>, DagError> {
        let cancel = CancellationToken::new();
        let fetched = tokio::time::timeout(self.link_timeout, self.get_block(cid, &cancel)).await;
        cancel.cancel();
        let block = match fetched {
            Ok(Ok(block)) => block,
            Ok(Err(BlockServiceError::NotFound)) => return Err(DagError::NotFound { cid: *cid }),
            Ok(Err(e)) => {
                return Err(DagError::Fetch {
                    cid: *cid,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DagError::Fetch {
                    cid: *cid,
                    message: "timed out".to_string(),
                })
            }
        };
        links(&block)
    }
}

pub(crate) async fn get_block(
    blockstore: &Arc<dyn Blockstore>,
    exchange: Option<&dyn Exchange>,
    cid: &Cid,
    cancel: &CancellationToken,
) -> Result<Block> {
    match blockstore.get(cid) {
        Ok(block) => Ok(block),
        Err(BlockstoreError::NotFound) => match exchange {
            Some(exchange) => {
                debug!(cid = %cid, "[blockservice] not stored locally, asking the exchange");
                Ok(exchange.get_block(cid, cancel).await?)
            }
            None => Err(BlockServiceError::NotFound),
        },
        Err(e) => Err(e.into()),
    }
}

/// Shared by the service and its sessions: serve stored blocks, then hand
/// the rest to `fetch`, which yields `None` when offline.
pub(crate) async fn get_blocks<F, Fut>(
    blockstore: &Arc<dyn Blockstore>,
    cids: Vec<Cid>,
    cancel: CancellationToken,
    fetch: F,
) -> Result<BlockStream>
where
    F: FnOnce(Vec<Cid>, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<Option<BlockStream>, bx_04_exchange::ExchangeError>>,
{
    let mut seen = HashSet::new();
    let mut local = Vec::new();
    let mut missing = Vec::new();
    for cid in cids {
        if !seen.insert(cid) {
            continue;
        }
        match blockstore.get(&cid) {
            Ok(block) => local.push(block),
            Err(BlockstoreError::NotFound) => missing.push(cid),
            Err(e) => {
                warn!(cid = %cid, error = %e, "[blockservice] local read failed");
                missing.push(cid);
            }
        }
    }

    let local = stream::iter(local);
    if missing.is_empty() {
        return Ok(local.boxed());
    }
    match fetch(missing, cancel).await? {
        Some(remote) => Ok(local.chain(remote).boxed()),
        None => Ok(local.boxed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::MockExchange;
    use bx_01_blockstore::BaseBlockstore;
    use shared_types::test_utils::{dag_node, raw_block};
    use shared_types::MemoryDatastore;
    use std::path::PathBuf;

    fn blockstore() -> Arc<dyn Blockstore> {
        Arc::new(BaseBlockstore::new(MemoryDatastore::new()))
    }

    fn online() -> (BlockService, Arc<MockExchange>) {
        let exchange = Arc::new(MockExchange::default());
        let service = BlockService::new(blockstore(), Some(exchange.clone()));
        (service, exchange)
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let service = BlockService::new(blockstore(), None);
        let block = raw_block("beep boop");

        let cid = service.add_block(block.clone()).await.unwrap();

        let got = service.get_block(&cid, &CancellationToken::new()).await.unwrap();
        assert_eq!(got.data().as_ref(), b"beep boop");
        assert!(service.has_block(&cid).unwrap());
    }

    #[tokio::test]
    async fn test_add_announces_to_exchange() {
        let (service, exchange) = online();
        let block = raw_block("announce");
        service.add_block(block.clone()).await.unwrap();
        service.add_block(block.clone()).await.unwrap();
        assert_eq!(exchange.announced(), vec![*block.cid(), *block.cid()]);
    }

    #[tokio::test]
    async fn test_check_first_skips_stored_blocks() {
        let exchange = Arc::new(MockExchange::default());
        let service = BlockService::new(blockstore(), Some(exchange.clone())).check_first(true);
        let block = raw_block("once");

        service.add_block(block.clone()).await.unwrap();
        service.add_block(block.clone()).await.unwrap();
        service.add_blocks(vec![block.clone(), raw_block("two")]).await.unwrap();

        assert_eq!(exchange.announced(), vec![*block.cid(), *raw_block("two").cid()]);
    }

    #[tokio::test]
    async fn test_miss_goes_to_exchange() {
        let (service, exchange) = online();
        let block = raw_block("remote");
        exchange.insert(block.clone());

        let got = service.get_block(block.cid(), &CancellationToken::new()).await.unwrap();
        assert_eq!(got, block);
    }

    #[tokio::test]
    async fn test_offline_miss_is_not_found() {
        let service = BlockService::new(blockstore(), None);
        let err = service
            .get_block(raw_block("absent").cid(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, BlockServiceError::NotFound);
    }

    #[tokio::test]
    async fn test_canceled_fetch() {
        let (service, _exchange) = online();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service
            .get_block(raw_block("absent").cid(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, BlockServiceError::Canceled);
    }

    #[tokio::test]
    async fn test_get_blocks_local_then_remote() {
        let (service, exchange) = online();
        let local = raw_block("local");
        let remote = raw_block("remote");
        service.add_block(local.clone()).await.unwrap();
        exchange.insert(remote.clone());

        let got: Vec<Block> = service
            .get_blocks(vec![*remote.cid(), *local.cid(), *local.cid()], CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(got, vec![local, remote]);
    }

    #[tokio::test]
    async fn test_offline_get_blocks_skips_missing() {
        let service = BlockService::new(blockstore(), None);
        let local = raw_block("local");
        service.add_block(local.clone()).await.unwrap();

        let got: Vec<Block> = service
            .get_blocks(vec![*local.cid(), *raw_block("gone").cid()], CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(got, vec![local]);
    }

    #[tokio::test]
    async fn test_delete_block() {
        let service = BlockService::new(blockstore(), None);
        let cid = service.add_block(raw_block("bye")).await.unwrap();

        service.delete_block(&cid).await.unwrap();

        assert!(!service.has_block(&cid).unwrap());
        assert_eq!(
            service.get_block(&cid, &CancellationToken::new()).await.unwrap_err(),
            BlockServiceError::NotFound
        );
    }

    #[tokio::test]
    async fn test_rejects_tampered_and_undecodable_blocks() {
        let service = BlockService::new(blockstore(), None);
        let forged = Block::with_cid(*raw_block("real").cid(), &b"fake"[..]);
        assert!(matches!(
            service.add_block(forged).await,
            Err(BlockServiceError::InvalidBlock(_))
        ));

        let garbage = Block::new_protobuf(&[0xFF, 0xFF, 0xFF][..]).unwrap();
        assert!(matches!(
            service.add_block(garbage).await,
            Err(BlockServiceError::InvalidBlock(_))
        ));
    }

    #[tokio::test]
    async fn test_filestore_reference_recorded() {
        let refs: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let service = BlockService::new(blockstore(), None).with_filestore(refs);
        let block = raw_block("chunk").with_kind(BlockKind::Filestore {
            path: PathBuf::from("/data/file.bin"),
            offset: 4096,
        });

        let cid = service.add_block(block).await.unwrap();

        let reference = service.filestore_ref(&cid).unwrap().unwrap();
        assert_eq!(reference.offset, 4096);
        assert_eq!(reference.size, 5);

        service.delete_block(&cid).await.unwrap();
        assert_eq!(service.filestore_ref(&cid).unwrap(), None);
    }

    #[tokio::test]
    async fn test_filestore_block_needs_filestore() {
        let service = BlockService::new(blockstore(), None);
        let block = raw_block("chunk").with_kind(BlockKind::Filestore {
            path: PathBuf::from("/data/file.bin"),
            offset: 0,
        });
        assert_eq!(
            service.add_block(block).await.unwrap_err(),
            BlockServiceError::FilestoreDisabled
        );
    }

    #[tokio::test]
    async fn test_links_fetched_through_exchange() {
        let (service, exchange) = online();
        let leaf = raw_block("leaf");
        let root = dag_node("root", &[&leaf]);
        exchange.insert(root.clone());

        assert_eq!(service.get_links(root.cid()).await.unwrap(), vec![*leaf.cid()]);

        let offline = BlockService::new(blockstore(), None);
        assert_eq!(
            offline.get_links(root.cid()).await.unwrap_err(),
            DagError::NotFound { cid: *root.cid() }
        );
    }

    #[tokio::test]
    async fn test_recursive_pin_walks_through_exchange() {
        let (service, exchange) = online();
        let leaf = raw_block("leaf");
        let root = dag_node("root", &[&leaf]);
        exchange.insert(root.clone());
        exchange.insert(leaf);

        let links: Arc<dyn LinkSource> = Arc::new(service);
        let pinner = bx_02_pinning::Pinner::new(Arc::new(MemoryDatastore::new()), links, GcLocker::new());

        pinner.pin(root.cid(), true).await.unwrap();
        assert_eq!(pinner.recursive_keys(), vec![*root.cid()]);
    }
}
