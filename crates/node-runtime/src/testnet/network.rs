//! In-process transport.
//!
//! Every message is encoded to wire bytes and decoded again on delivery,
//! so peers on a [`VirtualNetwork`] exercise the same codec path as a real
//! transport.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bx_04_exchange::{BitswapMessage, BitswapNetwork, NetworkError, NetworkReceiver, ProtocolVersion};
use parking_lot::Mutex;
use shared_types::PeerId;
use tracing::trace;

fn link(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a < b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Shared medium for in-process peers.
pub struct VirtualNetwork {
    latency: Duration,
    version: ProtocolVersion,
    receivers: Mutex<HashMap<PeerId, Weak<dyn NetworkReceiver>>>,
    links: Mutex<HashSet<(PeerId, PeerId)>>,
    /// Delivered messages per (sender, recipient).
    delivered: Mutex<HashMap<(PeerId, PeerId), usize>>,
}

impl VirtualNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    /// Every delivery waits `latency` first.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            version: ProtocolVersion::V110,
            receivers: Mutex::new(HashMap::new()),
            links: Mutex::new(HashSet::new()),
            delivered: Mutex::new(HashMap::new()),
        })
    }

    /// Transport handle for `peer`.
    pub fn adapter(self: &Arc<Self>, peer: PeerId) -> Arc<VirtualAdapter> {
        Arc::new(VirtualAdapter {
            network: Arc::clone(self),
            local: peer,
        })
    }

    /// Messages delivered from `from` to `to`.
    pub fn messages_between(&self, from: &PeerId, to: &PeerId) -> usize {
        self.delivered
            .lock()
            .get(&(from.clone(), to.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Messages `peer` sent or received.
    pub fn messages_involving(&self, peer: &PeerId) -> usize {
        self.delivered
            .lock()
            .iter()
            .filter(|((from, to), _)| from == peer || to == peer)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn is_connected(&self, a: &PeerId, b: &PeerId) -> bool {
        self.links.lock().contains(&link(a, b))
    }

    /// Drop the link between `a` and `b`, notifying both sides.
    pub async fn disconnect(&self, a: &PeerId, b: &PeerId) {
        if !self.links.lock().remove(&link(a, b)) {
            return;
        }
        if let Some(receiver) = self.receiver(a) {
            receiver.peer_disconnected(b.clone()).await;
        }
        if let Some(receiver) = self.receiver(b) {
            receiver.peer_disconnected(a.clone()).await;
        }
    }

    fn receiver(&self, peer: &PeerId) -> Option<Arc<dyn NetworkReceiver>> {
        self.receivers.lock().get(peer).and_then(Weak::upgrade)
    }
}

/// One peer's view of a [`VirtualNetwork`].
pub struct VirtualAdapter {
    network: Arc<VirtualNetwork>,
    local: PeerId,
}

impl VirtualAdapter {
    pub fn network(&self) -> &Arc<VirtualNetwork> {
        &self.network
    }
}

#[async_trait]
impl BitswapNetwork for VirtualAdapter {
    fn local_peer(&self) -> PeerId {
        self.local.clone()
    }

    fn set_receiver(&self, receiver: Weak<dyn NetworkReceiver>) {
        self.network.receivers.lock().insert(self.local.clone(), receiver);
    }

    async fn connect_to(&self, peer: &PeerId) -> Result<(), NetworkError> {
        if *peer == self.local {
            return Ok(());
        }
        let remote = self
            .network
            .receiver(peer)
            .ok_or_else(|| NetworkError::Unreachable(peer.clone()))?;
        if !self.network.links.lock().insert(link(&self.local, peer)) {
            return Ok(());
        }
        trace!(from = %self.local, to = %peer, "[testnet] link up");
        if let Some(local) = self.network.receiver(&self.local) {
            local.peer_connected(peer.clone()).await;
        }
        remote.peer_connected(self.local.clone()).await;
        Ok(())
    }

    async fn send_message(&self, peer: &PeerId, message: &BitswapMessage) -> Result<(), NetworkError> {
        let remote = self
            .network
            .receiver(peer)
            .ok_or_else(|| NetworkError::Unreachable(peer.clone()))?;
        let frame = message.to_bytes(self.network.version);
        if !self.network.latency.is_zero() {
            tokio::time::sleep(self.network.latency).await;
        }
        let decoded = BitswapMessage::from_bytes(&frame)?;
        *self
            .network
            .delivered
            .lock()
            .entry((self.local.clone(), peer.clone()))
            .or_default() += 1;
        remote.receive_message(self.local.clone(), decoded).await;
        Ok(())
    }
}
