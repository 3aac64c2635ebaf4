//! An exchange that serves blocks from memory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bx_04_exchange::{BlockStream, Exchange, ExchangeError, FetchSession};
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use shared_types::{Block, Cid};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub(crate) struct MockExchange {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    remote: Mutex<HashMap<Cid, Block>>,
    announced: Mutex<Vec<Cid>>,
    sessions: Mutex<usize>,
}

impl MockExchange {
    pub fn insert(&self, block: Block) {
        self.state.remote.lock().insert(*block.cid(), block);
    }

    pub fn announced(&self) -> Vec<Cid> {
        self.state.announced.lock().clone()
    }

    pub fn sessions(&self) -> usize {
        *self.state.sessions.lock()
    }
}

impl MockState {
    /// Resolves at once for known blocks; otherwise waits for `cancel`.
    async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block, ExchangeError> {
        let known = self.remote.lock().get(cid).cloned();
        match known {
            Some(block) if !cancel.is_cancelled() => Ok(block),
            _ => {
                cancel.cancelled().await;
                Err(ExchangeError::Canceled)
            }
        }
    }

    fn get_blocks(&self, cids: Vec<Cid>) -> BlockStream {
        let remote = self.remote.lock();
        let found: Vec<Block> = cids.iter().filter_map(|c| remote.get(c).cloned()).collect();
        stream::iter(found).boxed()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block, ExchangeError> {
        self.state.get_block(cid, cancel).await
    }

    async fn get_blocks(
        &self,
        cids: Vec<Cid>,
        _cancel: CancellationToken,
    ) -> Result<BlockStream, ExchangeError> {
        Ok(self.state.get_blocks(cids))
    }

    async fn has_block(&self, block: &Block) -> Result<(), ExchangeError> {
        self.state.announced.lock().push(*block.cid());
        Ok(())
    }

    fn new_session(&self, _cancel: CancellationToken) -> Box<dyn FetchSession> {
        *self.state.sessions.lock() += 1;
        Box::new(MockSession {
            state: self.state.clone(),
        })
    }

    async fn close(&self) {}
}

struct MockSession {
    state: Arc<MockState>,
}

#[async_trait]
impl FetchSession for MockSession {
    async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block, ExchangeError> {
        self.state.get_block(cid, cancel).await
    }

    async fn get_blocks(
        &self,
        cids: Vec<Cid>,
        _cancel: CancellationToken,
    ) -> Result<BlockStream, ExchangeError> {
        Ok(self.state.get_blocks(cids))
    }
}
