//! # Decision Engine
//!
//! Decides which blocks to send to which peers.
//!
//! Inbound messages update the per-peer [`Ledger`]s. Every want for a block
//! we hold becomes a task in the [`PeerRequestQueue`]; task workers pop
//! tasks, load the block and emit an [`Envelope`] on the outbox, which the
//! exchange's send workers drain.
//!
//! ## Locking
//!
//! Ledgers sit behind one `RwLock`, the request queue behind one `Mutex`.
//! Both are only held inside synchronous sections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bx_01_blockstore::{Blockstore, BlockstoreError};
use parking_lot::{Mutex, RwLock};
use shared_types::{Block, Cid, PeerId};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::ledger::{Ledger, Receipt};
use crate::domain::message::BitswapMessage;
use crate::domain::prq::PeerRequestQueue;

/// A single-block message ready for the transport.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub peer: PeerId,
    pub cid: Cid,
    pub message: BitswapMessage,
}

pub struct DecisionEngine {
    blockstore: Arc<dyn Blockstore>,
    ledgers: RwLock<HashMap<PeerId, Ledger>>,
    queue: Mutex<PeerRequestQueue>,
    work: Notify,
    dup_window: Duration,
}

impl DecisionEngine {
    pub fn new(blockstore: Arc<dyn Blockstore>, dup_window: Duration) -> Arc<Self> {
        Arc::new(Self {
            blockstore,
            ledgers: RwLock::new(HashMap::new()),
            queue: Mutex::new(PeerRequestQueue::new()),
            work: Notify::new(),
            dup_window,
        })
    }

    /// Spawn `workers` task workers feeding an outbox of `capacity`.
    pub fn start(
        self: &Arc<Self>,
        workers: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Envelope> {
        let (outbox, rx) = mpsc::channel(capacity.max(1));
        for _ in 0..workers.max(1) {
            tokio::spawn(self.clone().task_worker(outbox.clone(), cancel.clone()));
        }
        rx
    }

    async fn task_worker(self: Arc<Self>, outbox: mpsc::Sender<Envelope>, cancel: CancellationToken) {
        loop {
            while let Some(envelope) = self.next_envelope() {
                let (peer, cid) = (envelope.peer.clone(), envelope.cid);
                let sent = tokio::select! {
                    sent = outbox.send(envelope) => sent.is_ok(),
                    _ = cancel.cancelled() => false,
                };
                if !sent {
                    self.task_done(&peer, &cid);
                    return;
                }
            }
            tokio::select! {
                _ = self.work.notified() => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// Pop the next task and load its block. Tasks whose block vanished
    /// are completed and skipped.
    pub fn next_envelope(&self) -> Option<Envelope> {
        loop {
            let task = self.queue.lock().pop()?;
            match self.blockstore.get(&task.cid) {
                Ok(block) => {
                    let mut message = BitswapMessage::new(false);
                    message.add_block(block);
                    return Some(Envelope {
                        peer: task.peer,
                        cid: task.cid,
                        message,
                    });
                }
                Err(BlockstoreError::NotFound) => {
                    debug!(peer = %task.peer, cid = %task.cid, "[bitswap] block gone before send");
                }
                Err(e) => {
                    warn!(peer = %task.peer, cid = %task.cid, error = %e, "[bitswap] cannot load block for peer");
                }
            }
            self.queue.lock().task_done(&task.peer, &task.cid);
        }
    }

    /// Account for a message from `peer` and queue the blocks it wants.
    pub fn message_received(&self, peer: &PeerId, msg: &BitswapMessage) {
        let now = Instant::now();
        let mut pushed = 0;
        {
            let mut ledgers = self.ledgers.write();
            let mut queue = self.queue.lock();

            let ledger = ledgers
                .entry(peer.clone())
                .or_insert_with(|| Ledger::new(peer.clone()));
            ledger.record_exchange(now);

            if msg.full() {
                let kept: HashSet<Cid> = msg
                    .wantlist()
                    .iter()
                    .filter(|e| !e.cancel)
                    .map(|e| e.cid)
                    .collect();
                for cid in ledger.clear_wantlist() {
                    if !kept.contains(&cid) {
                        queue.remove(peer, &cid);
                    }
                }
            }

            for entry in msg.wantlist() {
                if entry.cancel {
                    ledger.cancel_want(&entry.cid);
                    queue.remove(peer, &entry.cid);
                    continue;
                }
                ledger.wants(entry.cid, entry.priority);
                match self.blockstore.has(&entry.cid) {
                    Ok(true) => {
                        if !ledger.recently_sent(&entry.cid, self.dup_window, now) {
                            queue.push(peer, entry.cid, entry.priority);
                            pushed += 1;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(peer = %peer, cid = %entry.cid, error = %e, "[bitswap] blockstore lookup failed");
                    }
                }
            }

            for block in msg.blocks() {
                ledger.received_bytes(block.len());
            }

            for block in msg.blocks() {
                if !matches!(self.blockstore.has(block.cid()), Ok(true)) {
                    continue;
                }
                pushed += queue_for_wanters(&ledgers, &mut queue, block.cid());
            }
        }
        self.signal(pushed);
    }

    /// Blocks became available locally; queue them for every peer that
    /// wants them.
    pub fn notify_new_blocks(&self, blocks: &[Block]) {
        let mut pushed = 0;
        {
            let ledgers = self.ledgers.read();
            let mut queue = self.queue.lock();
            for block in blocks {
                pushed += queue_for_wanters(&ledgers, &mut queue, block.cid());
            }
        }
        self.signal(pushed);
    }

    /// `msg` reached `peer`.
    pub fn message_sent(&self, peer: &PeerId, msg: &BitswapMessage) {
        let now = Instant::now();
        let mut ledgers = self.ledgers.write();
        let ledger = ledgers
            .entry(peer.clone())
            .or_insert_with(|| Ledger::new(peer.clone()));
        let mut queue = self.queue.lock();
        for block in msg.blocks() {
            ledger.sent_bytes(block.len());
            ledger.cancel_want(block.cid());
            ledger.mark_sent(*block.cid(), now);
            queue.remove(peer, block.cid());
        }
    }

    pub fn task_done(&self, peer: &PeerId, cid: &Cid) {
        self.queue.lock().task_done(peer, cid);
    }

    /// Drop the peer's pending tasks and wants. The ledger totals survive.
    pub fn peer_disconnected(&self, peer: &PeerId) {
        self.queue.lock().remove_peer(peer);
        if let Some(ledger) = self.ledgers.write().get_mut(peer) {
            ledger.clear_wantlist();
        }
    }

    /// What `peer` currently wants from us.
    pub fn wantlist_for_peer(&self, peer: &PeerId) -> Vec<(Cid, i32)> {
        self.ledgers
            .read()
            .get(peer)
            .map(Ledger::wantlist)
            .unwrap_or_default()
    }

    pub fn ledger_for_peer(&self, peer: &PeerId) -> Option<Receipt> {
        self.ledgers.read().get(peer).map(Ledger::receipt)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.ledgers.read().keys().cloned().collect()
    }

    pub fn pending_tasks(&self) -> usize {
        self.queue.lock().len()
    }

    fn signal(&self, pushed: usize) {
        for _ in 0..pushed {
            self.work.notify_one();
        }
    }
}

fn queue_for_wanters(
    ledgers: &HashMap<PeerId, Ledger>,
    queue: &mut PeerRequestQueue,
    cid: &Cid,
) -> usize {
    let mut pushed = 0;
    for (peer, ledger) in ledgers {
        if let Some(priority) = ledger.wantlist_contains(cid) {
            queue.push(peer, *cid, priority);
            pushed += 1;
        }
    }
    pushed
}
