//! # Block Subscriber
//!
//! The receiving side of the notifier.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use shared_types::{Block, Cid};
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::BlockFilter;
use crate::publisher::Topics;

/// A handle receiving the blocks for a set of CIDs.
///
/// When dropped, the subscription is removed from the notifier.
pub struct Subscription {
    id: Option<u64>,
    receiver: mpsc::Receiver<Block>,
    pending: BlockFilter,
    topics: Option<Arc<Mutex<Topics>>>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        receiver: mpsc::Receiver<Block>,
        pending: BlockFilter,
        topics: Arc<Mutex<Topics>>,
    ) -> Self {
        Self {
            id: Some(id),
            receiver,
            pending,
            topics: Some(topics),
        }
    }

    pub(crate) fn finished(mut receiver: mpsc::Receiver<Block>) -> Self {
        receiver.close();
        Self {
            id: None,
            receiver,
            pending: BlockFilter::default(),
            topics: None,
        }
    }

    /// Next awaited block, or `None` once all arrived or the notifier shut down.
    pub async fn recv(&mut self) -> Option<Block> {
        let block = self.receiver.recv().await?;
        self.pending.take(block.cid());
        Some(block)
    }

    /// CIDs not yet received.
    pub fn pending(&self) -> Vec<Cid> {
        self.pending.iter().copied().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_complete()
    }
}

impl Stream for Subscription {
    type Item = Block;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(block)) => {
                self.pending.take(block.cid());
                Poll::Ready(Some(block))
            }
            other => other,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let (Some(id), Some(topics)) = (self.id, self.topics.as_ref()) else {
            return;
        };
        topics.lock().unsubscribe(id);
        debug!(subscription = id, "Block subscription dropped");
    }
}
