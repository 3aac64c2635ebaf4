//! Want manager: owns the local wantlist and one outbound message queue per
//! connected peer.
//!
//! ```text
//! want/cancel ──► manager task ──► MsgQueue(peer A) ──► network
//!                      │       └──► MsgQueue(peer B) ──► network
//!                      └─ wantlist (shared, read-only outside the task)
//! ```
//!
//! Each queue holds at most one pending message. New changes are merged
//! into it, so a slow peer receives one combined update instead of a
//! backlog. A failed send is dropped; the next rebroadcast repairs it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bx_telemetry::metric_inc;
use bx_telemetry::metrics::{EXCHANGE_MESSAGES, PEERS_CONNECTED, WANTLIST_SIZE};
use parking_lot::Mutex;
use shared_types::{Cid, PeerId};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::config::ExchangeConfig;
use crate::domain::message::BitswapMessage;
use crate::domain::wantlist::{SessionId, WantEntry, Wantlist};
use crate::ports::outbound::BitswapNetwork;

/// Highest wire priority; the first CID of a request gets it.
pub const MAX_PRIORITY: i32 = i32::MAX;

const COMMAND_BUFFER: usize = 64;

enum WantCommand {
    Want {
        cids: Vec<Cid>,
        peers: Vec<PeerId>,
        session: SessionId,
    },
    Cancel {
        cids: Vec<Cid>,
        session: SessionId,
    },
    CancelAll(Vec<Cid>),
    Connected(PeerId),
    Disconnected(PeerId),
    Rebroadcast,
    Peers(oneshot::Sender<Vec<PeerId>>),
}

/// Handle to the want manager task.
#[derive(Clone)]
pub struct WantManager {
    commands: mpsc::Sender<WantCommand>,
    wantlist: Arc<Mutex<Wantlist>>,
}

impl WantManager {
    pub fn spawn(
        network: Arc<dyn BitswapNetwork>,
        config: &ExchangeConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let wantlist = Arc::new(Mutex::new(Wantlist::new()));
        let task = WantManagerTask {
            network,
            wantlist: wantlist.clone(),
            queues: HashMap::new(),
            connect_timeout: config.connect_timeout,
            send_timeout: config.send_timeout,
        };
        tokio::spawn(task.run(rx, cancel));
        Self { commands, wantlist }
    }

    /// Want `cids` on behalf of `session`. The change goes to `peers`, or
    /// to every connected peer when `peers` is empty.
    pub async fn want_blocks(&self, cids: Vec<Cid>, peers: Vec<PeerId>, session: SessionId) {
        if cids.is_empty() {
            return;
        }
        self.send(WantCommand::Want {
            cids,
            peers,
            session,
        })
        .await;
    }

    /// Drop `session`'s interest in `cids`. Peers are told once nobody
    /// wants a CID any more.
    pub async fn cancel_wants(&self, cids: Vec<Cid>, session: SessionId) {
        if cids.is_empty() {
            return;
        }
        self.send(WantCommand::Cancel { cids, session }).await;
    }

    /// Cancel `cids` for every requester, e.g. once the blocks arrived.
    pub async fn cancel_all(&self, cids: Vec<Cid>) {
        if cids.is_empty() {
            return;
        }
        self.send(WantCommand::CancelAll(cids)).await;
    }

    pub async fn connected(&self, peer: PeerId) {
        self.send(WantCommand::Connected(peer)).await;
    }

    pub async fn disconnected(&self, peer: PeerId) {
        self.send(WantCommand::Disconnected(peer)).await;
    }

    /// Resend the full wantlist to every peer.
    pub async fn rebroadcast(&self) {
        self.send(WantCommand::Rebroadcast).await;
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let (reply, rx) = oneshot::channel();
        self.send(WantCommand::Peers(reply)).await;
        rx.await.unwrap_or_default()
    }

    pub fn is_wanted(&self, cid: &Cid) -> bool {
        self.wantlist.lock().contains(cid)
    }

    /// Current wantlist by descending priority.
    pub fn wantlist(&self) -> Vec<WantEntry> {
        self.wantlist.lock().sorted_entries()
    }

    async fn send(&self, command: WantCommand) {
        if self.commands.send(command).await.is_err() {
            debug!("[bitswap] want manager stopped, dropping command");
        }
    }
}

struct WantManagerTask {
    network: Arc<dyn BitswapNetwork>,
    wantlist: Arc<Mutex<Wantlist>>,
    queues: HashMap<PeerId, MsgQueue>,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl WantManagerTask {
    async fn run(mut self, mut commands: mpsc::Receiver<WantCommand>, cancel: CancellationToken) {
        loop {
            let command = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };
            match command {
                WantCommand::Want {
                    cids,
                    peers,
                    session,
                } => self.want(&cids, &peers, session),
                WantCommand::Cancel { cids, session } => self.cancel(&cids, Some(session)),
                WantCommand::CancelAll(cids) => self.cancel(&cids, None),
                WantCommand::Connected(peer) => self.connected(peer, &cancel),
                WantCommand::Disconnected(peer) => self.disconnected(&peer),
                WantCommand::Rebroadcast => self.rebroadcast(),
                WantCommand::Peers(reply) => {
                    let _ = reply.send(self.queues.keys().cloned().collect());
                }
            }
        }
        for (_, queue) in self.queues.drain() {
            queue.stop.cancel();
        }
        PEERS_CONNECTED.set(0.0);
        debug!("[bitswap] want manager stopped");
    }

    fn want(&mut self, cids: &[Cid], peers: &[PeerId], session: SessionId) {
        let mut msg = BitswapMessage::new(false);
        {
            let mut wantlist = self.wantlist.lock();
            for (i, cid) in cids.iter().enumerate() {
                let priority = MAX_PRIORITY.saturating_sub(i as i32);
                wantlist.add(*cid, priority, session);
                msg.add_entry(*cid, priority);
            }
            WANTLIST_SIZE.set(wantlist.len() as f64);
        }

        let targeted: Vec<&MsgQueue> = peers.iter().filter_map(|p| self.queues.get(p)).collect();
        if targeted.is_empty() {
            for queue in self.queues.values() {
                queue.add_message(&msg);
            }
        } else {
            for queue in targeted {
                queue.add_message(&msg);
            }
        }
    }

    fn cancel(&mut self, cids: &[Cid], session: Option<SessionId>) {
        let mut msg = BitswapMessage::new(false);
        {
            let mut wantlist = self.wantlist.lock();
            for cid in cids {
                let removed = match session {
                    Some(session) => wantlist.remove(cid, session),
                    None => wantlist.remove_all(cid),
                };
                if removed {
                    msg.cancel(*cid);
                }
            }
            WANTLIST_SIZE.set(wantlist.len() as f64);
        }
        if msg.is_empty() {
            return;
        }
        for queue in self.queues.values() {
            queue.add_message(&msg);
        }
    }

    fn full_wantlist(&self) -> BitswapMessage {
        let mut msg = BitswapMessage::new(true);
        for entry in self.wantlist.lock().sorted_entries() {
            msg.add_entry(entry.cid, entry.priority);
        }
        msg
    }

    fn connected(&mut self, peer: PeerId, cancel: &CancellationToken) {
        if let Some(queue) = self.queues.get_mut(&peer) {
            queue.refs += 1;
            return;
        }
        let queue = MsgQueue::new();
        queue.replace(self.full_wantlist());
        tokio::spawn(run_queue(
            peer.clone(),
            queue.pending.clone(),
            queue.work.clone(),
            self.network.clone(),
            self.connect_timeout,
            self.send_timeout,
            queue.stop.clone(),
            cancel.clone(),
        ));
        debug!(peer = %peer, "[bitswap] peer connected");
        self.queues.insert(peer, queue);
        PEERS_CONNECTED.set(self.queues.len() as f64);
    }

    fn disconnected(&mut self, peer: &PeerId) {
        let Some(queue) = self.queues.get_mut(peer) else {
            return;
        };
        queue.refs -= 1;
        if queue.refs > 0 {
            return;
        }
        queue.stop.cancel();
        self.queues.remove(peer);
        debug!(peer = %peer, "[bitswap] peer disconnected");
        PEERS_CONNECTED.set(self.queues.len() as f64);
    }

    fn rebroadcast(&mut self) {
        if self.wantlist.lock().is_empty() {
            return;
        }
        let full = self.full_wantlist();
        for queue in self.queues.values() {
            queue.replace(full.clone());
        }
    }
}

struct MsgQueue {
    pending: Arc<Mutex<Option<BitswapMessage>>>,
    work: Arc<Notify>,
    refs: usize,
    stop: CancellationToken,
}

impl MsgQueue {
    fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(None)),
            work: Arc::new(Notify::new()),
            refs: 1,
            stop: CancellationToken::new(),
        }
    }

    /// Merge the wantlist changes of `msg` into the pending message.
    fn add_message(&self, msg: &BitswapMessage) {
        {
            let mut pending = self.pending.lock();
            let pending = pending.get_or_insert_with(|| BitswapMessage::new(false));
            for entry in msg.wantlist() {
                if entry.cancel {
                    pending.cancel(entry.cid);
                } else {
                    pending.add_entry(entry.cid, entry.priority);
                }
            }
        }
        self.work.notify_one();
    }

    fn replace(&self, msg: BitswapMessage) {
        *self.pending.lock() = Some(msg);
        self.work.notify_one();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_queue(
    peer: PeerId,
    pending: Arc<Mutex<Option<BitswapMessage>>>,
    work: Arc<Notify>,
    network: Arc<dyn BitswapNetwork>,
    connect_timeout: Duration,
    send_timeout: Duration,
    stop: CancellationToken,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = work.notified() => {}
            _ = stop.cancelled() => break,
            _ = shutdown.cancelled() => break,
        }
        let Some(msg) = pending.lock().take() else {
            continue;
        };
        if msg.is_empty() {
            continue;
        }

        match timeout(connect_timeout, network.connect_to(&peer)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "[bitswap] cannot connect, dropping wantlist update");
                continue;
            }
            Err(_) => {
                warn!(peer = %peer, "[bitswap] connect timed out, dropping wantlist update");
                continue;
            }
        }

        match timeout(send_timeout, network.send_message(&peer, &msg)).await {
            Ok(Ok(())) => {
                metric_inc!(EXCHANGE_MESSAGES, &["sent"]);
                debug!(peer = %peer, entries = msg.wantlist().len(), full = msg.full(), "[bitswap] wantlist sent");
            }
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "[bitswap] wantlist send failed");
            }
            Err(_) => {
                warn!(peer = %peer, "[bitswap] wantlist send timed out");
            }
        }
    }
}
