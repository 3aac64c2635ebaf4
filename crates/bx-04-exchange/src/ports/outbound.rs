//! Outbound ports (SPI) for the exchange.

use std::sync::Weak;

use async_trait::async_trait;
use shared_types::PeerId;

use super::inbound::NetworkReceiver;
use crate::domain::errors::NetworkError;
use crate::domain::message::BitswapMessage;

/// Message transport between peers.
///
/// Implementations deliver inbound messages and connection events to the
/// registered [`NetworkReceiver`]. The receiver is held weakly so the
/// exchange can be dropped while the transport lives on.
#[async_trait]
pub trait BitswapNetwork: Send + Sync {
    fn local_peer(&self) -> PeerId;

    /// Register the exchange that handles inbound traffic.
    fn set_receiver(&self, receiver: Weak<dyn NetworkReceiver>);

    /// Make sure a connection to `peer` exists.
    async fn connect_to(&self, peer: &PeerId) -> Result<(), NetworkError>;

    async fn send_message(&self, peer: &PeerId, message: &BitswapMessage)
        -> Result<(), NetworkError>;
}
