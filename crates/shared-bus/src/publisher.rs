//! # Block Publisher
//!
//! The publishing side of the notifier: whoever stores a block announces it
//! here and every subscription waiting for that CID receives a copy.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::{Block, Cid};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::BlockFilter;
use crate::subscriber::Subscription;

/// Interface components use to announce newly available blocks.
pub trait BlockPublisher: Send + Sync {
    /// Deliver `block` to every subscription awaiting its CID.
    ///
    /// Returns the number of subscriptions that received it.
    fn publish(&self, block: &Block) -> usize;

    /// Total blocks published.
    fn events_published(&self) -> u64;
}

pub(crate) struct SubscriberSlot {
    sender: mpsc::Sender<Block>,
    filter: BlockFilter,
}

#[derive(Default)]
pub(crate) struct Topics {
    next_id: u64,
    by_cid: HashMap<Cid, HashSet<u64>>,
    subscribers: HashMap<u64, SubscriberSlot>,
}

impl Topics {
    pub(crate) fn unsubscribe(&mut self, id: u64) {
        let Some(slot) = self.subscribers.remove(&id) else {
            return;
        };
        for cid in slot.filter.iter() {
            if let Some(ids) = self.by_cid.get_mut(cid) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_cid.remove(cid);
                }
            }
        }
    }
}

/// In-memory block notifier.
///
/// Each subscription gets a channel sized to the number of CIDs it awaits,
/// and each CID is delivered at most once, so publishing never blocks and
/// never drops a wanted block. A subscription's stream ends once every
/// awaited CID has arrived, when it is dropped, or on [`shutdown`].
///
/// [`shutdown`]: InMemoryNotifier::shutdown
pub struct InMemoryNotifier {
    topics: Arc<Mutex<Topics>>,
    events_published: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(Topics::default())),
            events_published: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to the blocks for `cids`.
    ///
    /// Duplicate CIDs are collapsed. Subscribing with no CIDs, or after
    /// shutdown, yields an already-finished subscription.
    #[must_use]
    pub fn subscribe(&self, cids: impl IntoIterator<Item = Cid>) -> Subscription {
        let filter = BlockFilter::new(cids);
        let (sender, receiver) = mpsc::channel(filter.len().max(1));

        if filter.is_empty() || self.closed.load(Ordering::Acquire) {
            return Subscription::finished(receiver);
        }

        let mut topics = self.topics.lock();
        let id = topics.next_id;
        topics.next_id += 1;
        for cid in filter.iter() {
            topics.by_cid.entry(*cid).or_default().insert(id);
        }
        debug!(subscription = id, keys = filter.len(), "New block subscription");
        let local = filter.clone();
        topics
            .subscribers
            .insert(id, SubscriberSlot { sender, filter });

        Subscription::new(id, receiver, local, self.topics.clone())
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.topics.lock().subscribers.len()
    }

    /// Whether anyone is waiting for `cid`.
    pub fn has_subscribers(&self, cid: &Cid) -> bool {
        self.topics.lock().by_cid.contains_key(cid)
    }

    /// End every subscription and refuse new ones.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut topics = self.topics.lock();
        topics.by_cid.clear();
        topics.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for InMemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockPublisher for InMemoryNotifier {
    fn publish(&self, block: &Block) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.topics.lock();
        let Some(ids) = topics.by_cid.remove(block.cid()) else {
            return 0;
        };

        let mut delivered = 0;
        for id in ids {
            let Some(slot) = topics.subscribers.get_mut(&id) else {
                continue;
            };
            if !slot.filter.take(block.cid()) {
                continue;
            }
            match slot.sender.try_send(block.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(subscription = id, cid = %block.cid(), error = %e, "Block notification dropped");
                }
            }
            if slot.filter.is_complete() {
                // Dropping the sender ends the subscriber's stream.
                topics.subscribers.remove(&id);
            }
        }

        debug!(cid = %block.cid(), receivers = delivered, "Block published");
        delivered
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
