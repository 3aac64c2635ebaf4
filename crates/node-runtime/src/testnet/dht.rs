//! Content routing for in-process peers, backed by one shared provider
//! store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bx_03_providers::{ProviderConfig, ProviderManager};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use shared_types::{Cid, ContentRouting, MemoryDatastore, PeerId, PeerInfo, RoutingError, SystemTimeSource};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Provider records shared by every [`MockDht`] client.
pub struct DhtServer {
    providers: ProviderManager,
    peers: RwLock<HashSet<PeerId>>,
    cancel: CancellationToken,
}

impl DhtServer {
    /// Must be called within a tokio runtime.
    pub fn new() -> Arc<Self> {
        Self::with_config(ProviderConfig::default())
    }

    pub fn with_config(config: ProviderConfig) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let providers = ProviderManager::spawn(
            Arc::new(MemoryDatastore::new()),
            config,
            Arc::new(SystemTimeSource),
            cancel.clone(),
        );
        Arc::new(Self {
            providers,
            peers: RwLock::new(HashSet::new()),
            cancel,
        })
    }

    /// Routing client acting for `peer`.
    pub fn client(self: &Arc<Self>, peer: PeerId) -> Arc<MockDht> {
        self.peers.write().insert(peer.clone());
        Arc::new(MockDht {
            server: Arc::clone(self),
            local: peer,
        })
    }

    pub fn providers(&self) -> &ProviderManager {
        &self.providers
    }
}

impl Drop for DhtServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// [`ContentRouting`] for one peer of the test network.
pub struct MockDht {
    server: Arc<DhtServer>,
    local: PeerId,
}

#[async_trait]
impl ContentRouting for MockDht {
    async fn provide(&self, cid: &Cid) -> Result<(), RoutingError> {
        debug!(cid = %cid, peer = %self.local, "[testnet] provide");
        self.server
            .providers
            .add_provider(*cid, self.local.clone())
            .await
            .map_err(|e| RoutingError::Unavailable(e.to_string()))
    }

    fn find_providers(&self, cid: &Cid, max: usize) -> BoxStream<'static, PeerInfo> {
        let providers = self.server.providers.clone();
        let cid = *cid;
        stream::once(async move { providers.get_providers(&cid).await.unwrap_or_default() })
            .flat_map(move |peers| stream::iter(peers.into_iter().take(max).map(PeerInfo::new)))
            .boxed()
    }

    async fn find_peer(&self, peer: &PeerId) -> Result<PeerInfo, RoutingError> {
        if self.server.peers.read().contains(peer) {
            Ok(PeerInfo::new(peer.clone()))
        } else {
            Err(RoutingError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provide_then_find() {
        let server = DhtServer::new();
        let a = server.client(PeerId::from_bytes(b"a"));
        let b = server.client(PeerId::from_bytes(b"b"));
        let cid = *shared_types::test_utils::raw_block("content").cid();

        a.provide(&cid).await.unwrap();
        let found: Vec<PeerInfo> = b.find_providers(&cid, 8).collect().await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, PeerId::from_bytes(b"a"));
    }

    #[tokio::test]
    async fn test_find_providers_respects_max() {
        let server = DhtServer::new();
        let cid = *shared_types::test_utils::raw_block("popular").cid();
        for i in 0..5u8 {
            server.client(PeerId::from_bytes(&[i])).provide(&cid).await.unwrap();
        }
        let client = server.client(PeerId::from_bytes(b"reader"));
        let found: Vec<PeerInfo> = client.find_providers(&cid, 3).collect().await;
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_find_peer() {
        let server = DhtServer::new();
        let a = server.client(PeerId::from_bytes(b"a"));
        assert!(a.find_peer(&PeerId::from_bytes(b"a")).await.is_ok());
        assert_eq!(
            a.find_peer(&PeerId::from_bytes(b"nobody")).await,
            Err(RoutingError::NotFound)
        );
    }
}
