//! # In-Memory Test Network
//!
//! Runs several nodes in one process: a [`VirtualNetwork`] carries encoded
//! wire messages between them and a shared [`DhtServer`] answers provider
//! lookups.
//!
//! ```rust,ignore
//! let net = Testnet::new();
//! let a = net.spawn_node("a", NodeConfig::default()).await?;
//! let b = net.spawn_node("b", NodeConfig::default()).await?;
//! net.connect(&a, &b).await?;
//! ```

mod dht;
mod network;

pub use dht::{DhtServer, MockDht};
pub use network::{VirtualAdapter, VirtualNetwork};

use std::sync::Arc;
use std::time::Duration;

use bx_04_exchange::{BitswapNetwork, NetworkError};
use shared_types::PeerId;

use crate::container::{Node, NodeConfig, NodeError};

/// A virtual network plus the routing shared by its peers.
pub struct Testnet {
    network: Arc<VirtualNetwork>,
    dht: Arc<DhtServer>,
}

impl Testnet {
    /// Must be called within a tokio runtime.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            network: VirtualNetwork::with_latency(latency),
            dht: DhtServer::new(),
        }
    }

    pub fn network(&self) -> &Arc<VirtualNetwork> {
        &self.network
    }

    pub fn dht(&self) -> &Arc<DhtServer> {
        &self.dht
    }

    /// Start a node whose peer id is `name`.
    pub async fn spawn_node(&self, name: &str, config: NodeConfig) -> Result<Node, NodeError> {
        let peer = PeerId::from_bytes(name.as_bytes());
        let adapter: Arc<dyn BitswapNetwork> = self.network.adapter(peer.clone());
        Node::start(config, Some(adapter), self.dht.client(peer)).await
    }

    /// Link two online nodes.
    pub async fn connect(&self, a: &Node, b: &Node) -> Result<(), NetworkError> {
        let (Some(a), Some(b)) = (a.peer_id(), b.peer_id()) else {
            return Err(NetworkError::Closed);
        };
        self.network.adapter(a).connect_to(&b).await
    }
}

impl Default for Testnet {
    fn default() -> Self {
        Self::new()
    }
}
