//! Block sessions: the block service read path over an exchange session.

use std::sync::Arc;

use bx_01_blockstore::{Blockstore, BlockstoreError};
use bx_04_exchange::{BlockStream, FetchSession};
use shared_types::{Block, Cid};
use tokio_util::sync::CancellationToken;

use super::block_service::get_blocks;
use crate::domain::errors::{BlockServiceError, Result};

/// Fetches related blocks through one exchange session, so peers that
/// answered earlier requests are asked first. Offline sessions only read
/// the blockstore.
pub struct BlockSession {
    blockstore: Arc<dyn Blockstore>,
    session: Option<Arc<dyn FetchSession>>,
}

impl BlockSession {
    pub(crate) fn new(blockstore: Arc<dyn Blockstore>, session: Option<Box<dyn FetchSession>>) -> Self {
        Self {
            blockstore,
            session: session.map(Arc::from),
        }
    }

    pub async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block> {
        match self.blockstore.get(cid) {
            Ok(block) => Ok(block),
            Err(BlockstoreError::NotFound) => match &self.session {
                Some(session) => Ok(session.get_block(cid, cancel).await?),
                None => Err(BlockServiceError::NotFound),
            },
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_blocks(&self, cids: Vec<Cid>, cancel: CancellationToken) -> Result<BlockStream> {
        let session = self.session.clone();
        get_blocks(&self.blockstore, cids, cancel, |missing, cancel| async move {
            match session {
                Some(session) => session.get_blocks(missing, cancel).await.map(Some),
                None => Ok(None),
            }
        })
        .await
    }
}
