//! Inbound ports (API) for the exchange.

use async_trait::async_trait;
use futures::stream::BoxStream;
use shared_types::{Block, Cid, PeerId};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{ExchangeError, NetworkError};
use crate::domain::message::BitswapMessage;

/// Blocks delivered for a request, in arrival order. The stream ends once
/// every requested block was delivered or the request was canceled.
pub type BlockStream = BoxStream<'static, Block>;

/// Callbacks from the transport.
#[async_trait]
pub trait NetworkReceiver: Send + Sync {
    async fn receive_message(&self, from: PeerId, message: BitswapMessage);

    fn receive_error(&self, error: NetworkError);

    async fn peer_connected(&self, peer: PeerId);

    async fn peer_disconnected(&self, peer: PeerId);
}

/// Block retrieval used by the block service.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block, ExchangeError>;

    async fn get_blocks(
        &self,
        cids: Vec<Cid>,
        cancel: CancellationToken,
    ) -> Result<BlockStream, ExchangeError>;

    /// A block was stored locally.
    async fn has_block(&self, block: &Block) -> Result<(), ExchangeError>;

    /// Start a fetch session bounded by `cancel`.
    fn new_session(&self, cancel: CancellationToken) -> Box<dyn FetchSession>;

    async fn close(&self);
}

/// A group of related fetches sharing peers and an adaptive tick.
#[async_trait]
pub trait FetchSession: Send + Sync {
    async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block, ExchangeError>;

    async fn get_blocks(
        &self,
        cids: Vec<Cid>,
        cancel: CancellationToken,
    ) -> Result<BlockStream, ExchangeError>;
}
