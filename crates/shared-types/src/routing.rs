//! # Content Routing Port
//!
//! The provider index the node announces to and queries. Usually a DHT;
//! tests use an in-process mock.

use async_trait::async_trait;
use cid::Cid;
use futures::stream::{self, BoxStream};

use crate::entities::{PeerId, PeerInfo};
use crate::errors::RoutingError;

#[async_trait]
pub trait ContentRouting: Send + Sync {
    /// Announce that this node can serve `cid`.
    async fn provide(&self, cid: &Cid) -> Result<(), RoutingError>;

    /// Stream up to `max` providers of `cid`. Dropping the stream cancels
    /// the search.
    fn find_providers(&self, cid: &Cid, max: usize) -> BoxStream<'static, PeerInfo>;

    async fn find_peer(&self, peer: &PeerId) -> Result<PeerInfo, RoutingError>;
}

/// Routing for offline nodes: provides are dropped, searches are empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRouting;

#[async_trait]
impl ContentRouting for NullRouting {
    async fn provide(&self, _cid: &Cid) -> Result<(), RoutingError> {
        Ok(())
    }

    fn find_providers(&self, _cid: &Cid, _max: usize) -> BoxStream<'static, PeerInfo> {
        Box::pin(stream::empty())
    }

    async fn find_peer(&self, _peer: &PeerId) -> Result<PeerInfo, RoutingError> {
        Err(RoutingError::NotFound)
    }
}
