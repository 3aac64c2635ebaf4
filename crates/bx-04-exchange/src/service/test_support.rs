//! In-process transports for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bx_01_blockstore::{BaseBlockstore, Blockstore};
use parking_lot::Mutex;
use shared_types::{MemoryDatastore, PeerId};

use crate::domain::errors::NetworkError;
use crate::domain::message::{BitswapMessage, ProtocolVersion};
use crate::ports::inbound::NetworkReceiver;
use crate::ports::outbound::BitswapNetwork;

pub(crate) fn memory_blockstore() -> Arc<dyn Blockstore> {
    Arc::new(BaseBlockstore::new(MemoryDatastore::new()))
}

/// Poll `cond` until it holds, panicking after a few seconds.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Records dials and outgoing messages and never delivers them.
#[derive(Default)]
pub(crate) struct RecordingNetwork {
    sent: Mutex<Vec<(PeerId, BitswapMessage)>>,
    dialed: Mutex<Vec<PeerId>>,
}

impl RecordingNetwork {
    pub fn dialed(&self, peer: &PeerId) -> bool {
        self.dialed.lock().contains(peer)
    }

    pub fn sent_to(&self, peer: &PeerId) -> Vec<BitswapMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl BitswapNetwork for RecordingNetwork {
    fn local_peer(&self) -> PeerId {
        PeerId::from_bytes(b"local")
    }

    fn set_receiver(&self, _receiver: Weak<dyn NetworkReceiver>) {}

    async fn connect_to(&self, peer: &PeerId) -> Result<(), NetworkError> {
        self.dialed.lock().push(peer.clone());
        Ok(())
    }

    async fn send_message(&self, peer: &PeerId, message: &BitswapMessage) -> Result<(), NetworkError> {
        self.sent.lock().push((peer.clone(), message.clone()));
        Ok(())
    }
}

/// Delivers encoded messages between exchanges in the same process.
#[derive(Default)]
pub(crate) struct Hub {
    receivers: Mutex<HashMap<PeerId, Weak<dyn NetworkReceiver>>>,
    links: Mutex<HashSet<(PeerId, PeerId)>>,
}

impl Hub {
    pub fn join(self: &Arc<Self>, name: &str) -> Arc<HubNetwork> {
        Arc::new(HubNetwork {
            hub: self.clone(),
            local: PeerId::from_bytes(name.as_bytes()),
        })
    }

    fn receiver(&self, peer: &PeerId) -> Option<Arc<dyn NetworkReceiver>> {
        self.receivers.lock().get(peer).and_then(Weak::upgrade)
    }
}

pub(crate) struct HubNetwork {
    hub: Arc<Hub>,
    local: PeerId,
}

#[async_trait]
impl BitswapNetwork for HubNetwork {
    fn local_peer(&self) -> PeerId {
        self.local.clone()
    }

    fn set_receiver(&self, receiver: Weak<dyn NetworkReceiver>) {
        self.hub.receivers.lock().insert(self.local.clone(), receiver);
    }

    async fn connect_to(&self, peer: &PeerId) -> Result<(), NetworkError> {
        if *peer == self.local {
            return Ok(());
        }
        let remote = self
            .hub
            .receiver(peer)
            .ok_or_else(|| NetworkError::Unreachable(peer.clone()))?;
        let link = if self.local < *peer {
            (self.local.clone(), peer.clone())
        } else {
            (peer.clone(), self.local.clone())
        };
        if !self.hub.links.lock().insert(link) {
            return Ok(());
        }
        if let Some(local) = self.hub.receiver(&self.local) {
            local.peer_connected(peer.clone()).await;
        }
        remote.peer_connected(self.local.clone()).await;
        Ok(())
    }

    async fn send_message(&self, peer: &PeerId, message: &BitswapMessage) -> Result<(), NetworkError> {
        let frame = message.to_bytes(ProtocolVersion::V110);
        let decoded = BitswapMessage::from_bytes(&frame)?;
        let remote = self
            .hub
            .receiver(peer)
            .ok_or_else(|| NetworkError::Unreachable(peer.clone()))?;
        remote.receive_message(self.local.clone(), decoded).await;
        Ok(())
    }
}
