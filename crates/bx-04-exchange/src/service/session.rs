//! # Fetch Sessions
//!
//! A session groups related fetches, typically the blocks of one DAG. It
//! keeps at most `active_wants_limit` wants live, remembers which peers
//! answered, and targets later wants at them.
//!
//! ## Tick
//!
//! When nothing arrives for a while the session re-wants its live set and
//! asks routing for providers of the oldest live CID. The tick starts at
//! `session_search_delay` and adapts to `base_tick + 3 × avg latency` once
//! blocks arrive.
//!
//! ## Lifecycle
//!
//! ```text
//! New ──get_blocks──► Running ──all streams ended──► Drained
//!                        └──────────cancel──────────► Canceled
//! ```
//!
//! Either exit releases the session's wantlist references.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bx_01_blockstore::Blockstore;
use bx_telemetry::metrics::SESSIONS_ACTIVE;
use futures::StreamExt;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use shared_bus::InMemoryNotifier;
use shared_types::{Block, Cid, ContentRouting, PeerId};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fetch::{connect_to_providers, fetch_blocks, WantSink};
use super::want_manager::WantManager;
use crate::domain::config::ExchangeConfig;
use crate::domain::errors::ExchangeError;
use crate::domain::wantlist::SessionId;
use crate::ports::inbound::{BlockStream, FetchSession};
use crate::ports::outbound::BitswapNetwork;

pub(crate) type Interest = Arc<Mutex<LruCache<Cid, ()>>>;

/// What the exchange keeps to route inbound blocks to a session.
pub(crate) struct SessionLink {
    pub interest: Interest,
    pub incoming: mpsc::UnboundedSender<(PeerId, Cid)>,
}

impl SessionLink {
    pub fn interested_in(&self, cid: &Cid) -> bool {
        self.interest.lock().contains(cid)
    }
}

pub(crate) type SessionRegistry = Arc<RwLock<HashMap<SessionId, SessionLink>>>;

/// Components a session works with, shared with the exchange.
#[derive(Clone)]
pub(crate) struct SessionDeps {
    pub want_manager: WantManager,
    pub notifier: Arc<InMemoryNotifier>,
    pub blockstore: Arc<dyn Blockstore>,
    pub routing: Arc<dyn ContentRouting>,
    pub network: Arc<dyn BitswapNetwork>,
    pub registry: SessionRegistry,
    pub config: ExchangeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Running,
    Drained,
    Canceled,
}

enum SessionRequest {
    Want(Vec<Cid>),
    Cancel(Vec<Cid>),
}

/// Handle to a running session. Dropping it ends the session.
pub struct Session {
    id: SessionId,
    deps: SessionDeps,
    sink: Arc<SessionWants>,
    cancel: CancellationToken,
}

impl Session {
    pub(crate) fn start(id: SessionId, deps: SessionDeps, cancel: CancellationToken) -> Self {
        let size = NonZeroUsize::new(deps.config.session_interest_size).unwrap_or(NonZeroUsize::MIN);
        let interest: Interest = Arc::new(Mutex::new(LruCache::new(size)));
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (incoming, incoming_rx) = mpsc::unbounded_channel();

        deps.registry.write().insert(
            id,
            SessionLink {
                interest: interest.clone(),
                incoming,
            },
        );
        SESSIONS_ACTIVE.inc();

        let task = SessionTask {
            id,
            deps: deps.clone(),
            live: HashMap::new(),
            tofetch: VecDeque::new(),
            queued: HashSet::new(),
            peers: HashSet::new(),
            latency_total: Duration::ZERO,
            fetched: 0,
        };
        tokio::spawn(task.run(requests_rx, incoming_rx, cancel.clone()));
        debug!(session = id, "[bitswap] session started");

        Self {
            id,
            deps,
            sink: Arc::new(SessionWants {
                requests,
                interest,
                open_streams: AtomicUsize::new(0),
                started: AtomicU64::new(0),
            }),
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        if self.cancel.is_cancelled() {
            SessionState::Canceled
        } else if self.sink.started.load(Ordering::Acquire) == 0 {
            SessionState::New
        } else if self.sink.open_streams.load(Ordering::Acquire) == 0 {
            SessionState::Drained
        } else {
            SessionState::Running
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn fetch(&self, cids: Vec<Cid>, cancel: CancellationToken) -> Result<BlockStream, ExchangeError> {
        if self.cancel.is_cancelled() {
            return Err(ExchangeError::Canceled);
        }
        {
            let mut interest = self.sink.interest.lock();
            for cid in &cids {
                interest.put(*cid, ());
            }
        }
        self.sink.started.fetch_add(1, Ordering::AcqRel);
        self.sink.open_streams.fetch_add(1, Ordering::AcqRel);
        let result = fetch_blocks(
            &self.deps.notifier,
            &self.deps.blockstore,
            cids,
            cancel,
            &self.cancel,
            self.sink.clone(),
        )
        .await;
        if result.is_err() {
            self.sink.open_streams.fetch_sub(1, Ordering::AcqRel);
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl FetchSession for Session {
    async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block, ExchangeError> {
        let mut stream = self.fetch(vec![*cid], cancel.clone()).await?;
        match stream.next().await {
            Some(block) => Ok(block),
            None if self.deps.notifier.is_closed() => Err(ExchangeError::Closed),
            None => Err(ExchangeError::Canceled),
        }
    }

    async fn get_blocks(
        &self,
        cids: Vec<Cid>,
        cancel: CancellationToken,
    ) -> Result<BlockStream, ExchangeError> {
        self.fetch(cids, cancel).await
    }
}

struct SessionWants {
    requests: mpsc::UnboundedSender<SessionRequest>,
    interest: Interest,
    open_streams: AtomicUsize,
    started: AtomicU64,
}

#[async_trait]
impl WantSink for SessionWants {
    async fn want(&self, cids: Vec<Cid>) {
        let _ = self.requests.send(SessionRequest::Want(cids));
    }

    async fn finish(&self, remaining: Vec<Cid>) {
        if !remaining.is_empty() {
            let _ = self.requests.send(SessionRequest::Cancel(remaining));
        }
        self.open_streams.fetch_sub(1, Ordering::AcqRel);
    }
}

struct SessionTask {
    id: SessionId,
    deps: SessionDeps,
    /// Wanted from the network, with the time the want went out.
    live: HashMap<Cid, Instant>,
    /// Waiting for a live slot. May hold stale entries; `queued` decides.
    tofetch: VecDeque<Cid>,
    queued: HashSet<Cid>,
    /// Peers that sent us blocks or were found as providers.
    peers: HashSet<PeerId>,
    latency_total: Duration,
    fetched: u32,
}

impl SessionTask {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<SessionRequest>,
        mut incoming: mpsc::UnboundedReceiver<(PeerId, Cid)>,
        cancel: CancellationToken,
    ) {
        let (found_tx, mut found) = mpsc::unbounded_channel::<PeerId>();
        let tick = tokio::time::sleep(self.deps.config.session_search_delay);
        tokio::pin!(tick);

        loop {
            tokio::select! {
                Some(request) = requests.recv() => match request {
                    SessionRequest::Want(cids) => self.add_wants(cids).await,
                    SessionRequest::Cancel(cids) => self.cancel_wants(cids).await,
                },
                Some((from, cid)) = incoming.recv() => {
                    self.receive(from, cid).await;
                    tick.as_mut().reset(Instant::now() + self.next_tick());
                }
                Some(peer) = found.recv() => {
                    self.peers.insert(peer);
                }
                _ = &mut tick => {
                    self.on_tick(&found_tx, &cancel).await;
                    tick.as_mut().reset(Instant::now() + self.next_tick());
                }
                _ = cancel.cancelled() => break,
            }
        }

        let outstanding: Vec<Cid> = self.live.drain().map(|(cid, _)| cid).collect();
        self.deps.want_manager.cancel_wants(outstanding, self.id).await;
        self.deps.registry.write().remove(&self.id);
        SESSIONS_ACTIVE.dec();
        debug!(session = self.id, fetched = self.fetched, "[bitswap] session ended");
    }

    /// Blocks can land before the request that wants them is processed.
    fn is_stored(&self, cid: &Cid) -> bool {
        matches!(self.deps.blockstore.has(cid), Ok(true))
    }

    fn target_peers(&self) -> Vec<PeerId> {
        self.peers.iter().cloned().collect()
    }

    async fn add_wants(&mut self, cids: Vec<Cid>) {
        let now = Instant::now();
        let limit = self.deps.config.active_wants_limit;
        let mut send = Vec::new();
        for cid in cids {
            if self.live.contains_key(&cid) || self.queued.contains(&cid) || self.is_stored(&cid) {
                continue;
            }
            if self.live.len() < limit {
                self.live.insert(cid, now);
                send.push(cid);
            } else {
                self.queued.insert(cid);
                self.tofetch.push_back(cid);
            }
        }
        self.deps
            .want_manager
            .want_blocks(send, self.target_peers(), self.id)
            .await;
    }

    async fn cancel_wants(&mut self, cids: Vec<Cid>) {
        let mut released = Vec::new();
        for cid in cids {
            self.queued.remove(&cid);
            if self.live.remove(&cid).is_some() {
                released.push(cid);
            }
        }
        self.deps.want_manager.cancel_wants(released, self.id).await;
        self.promote().await;
    }

    async fn receive(&mut self, from: PeerId, cid: Cid) {
        self.peers.insert(from);
        match self.live.remove(&cid) {
            Some(sent_at) => {
                self.latency_total += sent_at.elapsed();
                self.fetched += 1;
            }
            None => {
                self.queued.remove(&cid);
            }
        }
        self.promote().await;
    }

    /// Fill free live slots from `tofetch`.
    async fn promote(&mut self) {
        let now = Instant::now();
        let mut send = Vec::new();
        while self.live.len() < self.deps.config.active_wants_limit {
            let Some(cid) = self.tofetch.pop_front() else {
                break;
            };
            if !self.queued.remove(&cid) || self.is_stored(&cid) {
                continue;
            }
            self.live.insert(cid, now);
            send.push(cid);
        }
        self.deps
            .want_manager
            .want_blocks(send, self.target_peers(), self.id)
            .await;
    }

    async fn on_tick(&mut self, found: &mpsc::UnboundedSender<PeerId>, cancel: &CancellationToken) {
        let stored: Vec<Cid> = self.live.keys().filter(|c| self.is_stored(c)).copied().collect();
        for cid in &stored {
            self.live.remove(cid);
        }
        self.deps.want_manager.cancel_wants(stored, self.id).await;
        self.promote().await;
        if self.live.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut oldest: Option<(Cid, Instant)> = None;
        for (cid, sent_at) in self.live.iter_mut() {
            if oldest.map_or(true, |(_, at)| *sent_at < at) {
                oldest = Some((*cid, *sent_at));
            }
            *sent_at = now;
        }
        let live: Vec<Cid> = self.live.keys().copied().collect();
        debug!(session = self.id, live = live.len(), "[bitswap] session tick, rebroadcasting wants");
        self.deps.want_manager.want_blocks(live, Vec::new(), self.id).await;

        let Some((cid, _)) = oldest else {
            return;
        };
        let routing = self.deps.routing.clone();
        let network = self.deps.network.clone();
        let max = self.deps.config.session_max_providers;
        let search_timeout = self.deps.config.provider_search_timeout;
        let found = found.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let peers = tokio::select! {
                peers = connect_to_providers(routing.as_ref(), network.as_ref(), &cid, max, search_timeout) => peers,
                _ = cancel.cancelled() => return,
            };
            for peer in peers {
                let _ = found.send(peer);
            }
        });
    }

    fn next_tick(&self) -> Duration {
        if self.fetched == 0 {
            return self.deps.config.session_search_delay;
        }
        let average = self.latency_total / self.fetched;
        self.deps.config.session_base_tick + average * 3
    }
}
