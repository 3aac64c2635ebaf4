//! # Bitswap
//!
//! The exchange facade. Owns the want manager, the decision engine, the
//! session registry and the background workers:
//!
//! | Worker | Count | Job |
//! |--------|-------|-----|
//! | send workers | `task_workers` | drain the engine outbox into the transport |
//! | provide collector | 1 | forward new CIDs to the provide workers |
//! | provide workers | `provide_workers` | rate-limited `provide` calls |
//! | rebroadcast | 1 | resend the full wantlist periodically |
//! | provider connector | 1 | find and connect providers for new wants |
//!
//! All workers stop when the exchange is closed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bx_01_blockstore::Blockstore;
use bx_telemetry::metric_add;
use bx_telemetry::metric_inc;
use bx_telemetry::metrics::{
    BLOCKS_RECEIVED, DUP_BLOCKS_RECEIVED, EXCHANGE_BYTES, EXCHANGE_MESSAGES, PROVIDES,
};
use futures::StreamExt;
use shared_bus::{BlockPublisher, InMemoryNotifier};
use shared_types::rate_limiter::presets;
use shared_types::{Block, Cid, ContentRouting, PeerId};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{DecisionEngine, Envelope};
use super::fetch::{connect_to_providers, fetch_blocks, WantSink};
use super::session::{Session, SessionDeps, SessionRegistry};
use super::want_manager::WantManager;
use crate::domain::config::ExchangeConfig;
use crate::domain::errors::{ConfigError, ExchangeError, NetworkError};
use crate::domain::ledger::Receipt;
use crate::domain::message::BitswapMessage;
use crate::domain::wantlist::SessionId;
use crate::ports::inbound::{BlockStream, Exchange, FetchSession, NetworkReceiver};
use crate::ports::outbound::BitswapNetwork;

const PROVIDER_REQUEST_BUFFER: usize = 16;

/// Snapshot of exchange counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitswapStat {
    pub wantlist: Vec<Cid>,
    pub peers: Vec<PeerId>,
    pub blocks_received: u64,
    pub data_received: u64,
    pub dup_blocks_received: u64,
    pub dup_data_received: u64,
    pub blocks_sent: u64,
    pub data_sent: u64,
    /// CIDs waiting to be provided.
    pub provide_buf_len: usize,
}

#[derive(Default)]
struct Counters {
    blocks_received: AtomicU64,
    data_received: AtomicU64,
    dup_blocks_received: AtomicU64,
    dup_data_received: AtomicU64,
    blocks_sent: AtomicU64,
    data_sent: AtomicU64,
}

pub struct Bitswap {
    config: ExchangeConfig,
    local: PeerId,
    deps: SessionDeps,
    engine: Arc<DecisionEngine>,
    provide_tx: mpsc::Sender<Cid>,
    find_providers_tx: mpsc::Sender<Cid>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl Bitswap {
    /// Build the exchange and start its workers. Must be called inside a
    /// tokio runtime.
    pub fn new(
        config: ExchangeConfig,
        network: Arc<dyn BitswapNetwork>,
        routing: Arc<dyn ContentRouting>,
        blockstore: Arc<dyn Blockstore>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());

        let want_manager = WantManager::spawn(network.clone(), &config, cancel.clone());
        let engine = DecisionEngine::new(blockstore.clone(), config.dup_suppression_window);
        let outbox = engine.start(config.task_workers, config.outbox_capacity, cancel.clone());
        let outbox = Arc::new(AsyncMutex::new(outbox));
        for _ in 0..config.task_workers {
            tokio::spawn(send_worker(
                outbox.clone(),
                engine.clone(),
                network.clone(),
                counters.clone(),
                config.connect_timeout,
                config.send_timeout,
                cancel.clone(),
            ));
        }

        let (provide_tx, provide_rx) = mpsc::channel(config.provide_buffer);
        if config.provide_enabled {
            spawn_provide_workers(provide_rx, routing.clone(), &config, cancel.clone());
        }

        tokio::spawn(rebroadcast_worker(
            want_manager.clone(),
            config.rebroadcast_interval,
            cancel.clone(),
        ));

        let (find_providers_tx, find_providers_rx) = mpsc::channel(PROVIDER_REQUEST_BUFFER);
        tokio::spawn(provider_connector(
            find_providers_rx,
            routing.clone(),
            network.clone(),
            config.max_providers_per_request,
            config.provider_search_timeout,
            cancel.clone(),
        ));

        let local = network.local_peer();
        let bitswap = Arc::new(Self {
            deps: SessionDeps {
                want_manager,
                notifier: Arc::new(InMemoryNotifier::new()),
                blockstore,
                routing,
                network: network.clone(),
                registry: SessionRegistry::default(),
                config: config.clone(),
            },
            config,
            local,
            engine,
            provide_tx,
            find_providers_tx,
            next_id: AtomicU64::new(1),
            counters,
            cancel,
        });

        let receiver: Arc<dyn NetworkReceiver> = bitswap.clone();
        network.set_receiver(Arc::downgrade(&receiver));
        info!(peer = %bitswap.local, "[bitswap] exchange started");
        Ok(bitswap)
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start a session. It ends when `cancel` fires, the handle is
    /// dropped, or the exchange closes.
    pub fn session(&self, cancel: CancellationToken) -> Session {
        let token = self.cancel.child_token();
        let link = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => link.cancel(),
                _ = link.cancelled() => {}
            }
        });
        Session::start(self.next_id(), self.deps.clone(), token)
    }

    /// [`Exchange::get_block`] bounded by `within`.
    pub async fn get_block_within(&self, cid: &Cid, within: Duration) -> Result<Block, ExchangeError> {
        let cancel = CancellationToken::new();
        let result = timeout(within, self.get_block(cid, &cancel)).await;
        cancel.cancel();
        result.unwrap_or(Err(ExchangeError::Timeout))
    }

    /// CIDs currently wanted from the network.
    pub fn wantlist(&self) -> Vec<Cid> {
        self.deps
            .want_manager
            .wantlist()
            .into_iter()
            .map(|e| e.cid)
            .collect()
    }

    /// What `peer` has asked us for.
    pub fn wantlist_for_peer(&self, peer: &PeerId) -> Vec<Cid> {
        self.engine
            .wantlist_for_peer(peer)
            .into_iter()
            .map(|(cid, _)| cid)
            .collect()
    }

    pub fn ledger_for_peer(&self, peer: &PeerId) -> Option<Receipt> {
        self.engine.ledger_for_peer(peer)
    }

    pub async fn stat(&self) -> BitswapStat {
        let c = &self.counters;
        BitswapStat {
            wantlist: self.wantlist(),
            peers: self.deps.want_manager.connected_peers().await,
            blocks_received: c.blocks_received.load(Ordering::Relaxed),
            data_received: c.data_received.load(Ordering::Relaxed),
            dup_blocks_received: c.dup_blocks_received.load(Ordering::Relaxed),
            dup_data_received: c.dup_data_received.load(Ordering::Relaxed),
            blocks_sent: c.blocks_sent.load(Ordering::Relaxed),
            data_sent: c.data_sent.load(Ordering::Relaxed),
            provide_buf_len: self.provide_tx.max_capacity() - self.provide_tx.capacity(),
        }
    }

    /// Whether an inbound block is wanted by the wantlist, a pending
    /// request or a session.
    fn is_wanted(&self, cid: &Cid) -> bool {
        self.deps.want_manager.is_wanted(cid)
            || self.deps.notifier.has_subscribers(cid)
            || self
                .deps
                .registry
                .read()
                .values()
                .any(|s| s.interested_in(cid))
    }

    fn enqueue_provide(&self, cid: Cid) {
        if !self.config.provide_enabled {
            return;
        }
        if let Err(e) = self.provide_tx.try_send(cid) {
            debug!(cid = %cid, error = %e, "[bitswap] provide queue full, leaving it to the reprovider");
        }
    }
}

impl Drop for Bitswap {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Exchange for Bitswap {
    async fn get_block(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Block, ExchangeError> {
        let mut stream = self.get_blocks(vec![*cid], cancel.clone()).await?;
        match stream.next().await {
            Some(block) => Ok(block),
            None if self.is_closed() => Err(ExchangeError::Closed),
            None => Err(ExchangeError::Canceled),
        }
    }

    async fn get_blocks(
        &self,
        cids: Vec<Cid>,
        cancel: CancellationToken,
    ) -> Result<BlockStream, ExchangeError> {
        if self.is_closed() {
            return Err(ExchangeError::Closed);
        }
        let sink = Arc::new(GlobalWants {
            id: self.next_id(),
            want_manager: self.deps.want_manager.clone(),
            find_providers: self.find_providers_tx.clone(),
        });
        fetch_blocks(
            &self.deps.notifier,
            &self.deps.blockstore,
            cids,
            cancel,
            &self.cancel,
            sink,
        )
        .await
    }

    async fn has_block(&self, block: &Block) -> Result<(), ExchangeError> {
        if self.is_closed() {
            return Err(ExchangeError::Closed);
        }
        self.deps.notifier.publish(block);
        self.engine.notify_new_blocks(std::slice::from_ref(block));
        self.deps.want_manager.cancel_all(vec![*block.cid()]).await;
        self.enqueue_provide(*block.cid());
        Ok(())
    }

    fn new_session(&self, cancel: CancellationToken) -> Box<dyn FetchSession> {
        Box::new(self.session(cancel))
    }

    async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.deps.notifier.shutdown();
        info!(peer = %self.local, "[bitswap] exchange closed");
    }
}

#[async_trait]
impl NetworkReceiver for Bitswap {
    async fn receive_message(&self, from: PeerId, message: BitswapMessage) {
        if self.is_closed() {
            return;
        }
        metric_inc!(EXCHANGE_MESSAGES, &["received"]);

        let mut wanted = Vec::new();
        for block in message.blocks() {
            let size = block.len() as u64;
            self.counters.blocks_received.fetch_add(1, Ordering::Relaxed);
            self.counters.data_received.fetch_add(size, Ordering::Relaxed);
            metric_inc!(BLOCKS_RECEIVED);
            metric_add!(EXCHANGE_BYTES, &["received"], size as f64);

            if !self.is_wanted(block.cid()) {
                debug!(peer = %from, cid = %block.cid(), "[bitswap] unwanted block discarded");
                continue;
            }
            if matches!(self.deps.blockstore.has(block.cid()), Ok(true)) {
                self.counters.dup_blocks_received.fetch_add(1, Ordering::Relaxed);
                self.counters.dup_data_received.fetch_add(size, Ordering::Relaxed);
                metric_inc!(DUP_BLOCKS_RECEIVED);
            }
            wanted.push(block.clone());
        }

        let stored = if wanted.is_empty() {
            true
        } else {
            match self.deps.blockstore.put_many(wanted.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(peer = %from, error = %e, "[bitswap] cannot store received blocks");
                    false
                }
            }
        };

        self.engine.message_received(&from, &message);
        if wanted.is_empty() || !stored {
            return;
        }

        let cids: Vec<Cid> = wanted.iter().map(|b| *b.cid()).collect();
        self.deps.want_manager.cancel_all(cids.clone()).await;
        for block in &wanted {
            self.deps.notifier.publish(block);
        }
        {
            let registry = self.deps.registry.read();
            for link in registry.values() {
                for cid in &cids {
                    if link.interested_in(cid) {
                        let _ = link.incoming.send((from.clone(), *cid));
                    }
                }
            }
        }
        for cid in cids {
            self.enqueue_provide(cid);
        }
    }

    fn receive_error(&self, error: NetworkError) {
        warn!(error = %error, "[bitswap] network error");
    }

    async fn peer_connected(&self, peer: PeerId) {
        self.deps.want_manager.connected(peer).await;
    }

    async fn peer_disconnected(&self, peer: PeerId) {
        self.deps.want_manager.disconnected(peer.clone()).await;
        self.engine.peer_disconnected(&peer);
    }
}

/// Wants of a plain (non-session) request.
struct GlobalWants {
    id: SessionId,
    want_manager: WantManager,
    find_providers: mpsc::Sender<Cid>,
}

#[async_trait]
impl WantSink for GlobalWants {
    async fn want(&self, cids: Vec<Cid>) {
        let first = cids.first().copied();
        self.want_manager.want_blocks(cids, Vec::new(), self.id).await;
        if let Some(cid) = first {
            let _ = self.find_providers.try_send(cid);
        }
    }

    async fn finish(&self, remaining: Vec<Cid>) {
        self.want_manager.cancel_wants(remaining, self.id).await;
    }
}

async fn send_worker(
    outbox: Arc<AsyncMutex<mpsc::Receiver<Envelope>>>,
    engine: Arc<DecisionEngine>,
    network: Arc<dyn BitswapNetwork>,
    counters: Arc<Counters>,
    connect_timeout: Duration,
    send_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let envelope = {
            let mut outbox = outbox.lock().await;
            tokio::select! {
                envelope = outbox.recv() => envelope,
                _ = cancel.cancelled() => None,
            }
        };
        let Some(Envelope { peer, cid, message }) = envelope else {
            break;
        };

        match deliver(network.as_ref(), &peer, &message, connect_timeout, send_timeout).await {
            Ok(()) => {
                let size = message.block_bytes() as u64;
                engine.message_sent(&peer, &message);
                counters.blocks_sent.fetch_add(message.blocks().len() as u64, Ordering::Relaxed);
                counters.data_sent.fetch_add(size, Ordering::Relaxed);
                metric_inc!(EXCHANGE_MESSAGES, &["sent"]);
                metric_add!(EXCHANGE_BYTES, &["sent"], size as f64);
                debug!(peer = %peer, cid = %cid, "[bitswap] block sent");
            }
            Err(e) => {
                warn!(peer = %peer, cid = %cid, error = %e, "[bitswap] block send failed");
            }
        }
        engine.task_done(&peer, &cid);
    }
}

async fn deliver(
    network: &dyn BitswapNetwork,
    peer: &PeerId,
    message: &BitswapMessage,
    connect_timeout: Duration,
    send_timeout: Duration,
) -> Result<(), NetworkError> {
    timeout(connect_timeout, network.connect_to(peer))
        .await
        .map_err(|_| NetworkError::Timeout)??;
    timeout(send_timeout, network.send_message(peer, message))
        .await
        .map_err(|_| NetworkError::Timeout)?
}

fn spawn_provide_workers(
    mut provide_rx: mpsc::Receiver<Cid>,
    routing: Arc<dyn ContentRouting>,
    config: &ExchangeConfig,
    cancel: CancellationToken,
) {
    let (work_tx, work_rx) = mpsc::channel::<Cid>(config.provide_workers);
    let work_rx = Arc::new(AsyncMutex::new(work_rx));
    let limiter = Arc::new(presets::provides());

    let collector_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            let cid = tokio::select! {
                cid = provide_rx.recv() => match cid {
                    Some(cid) => cid,
                    None => break,
                },
                _ = collector_cancel.cancelled() => break,
            };
            if work_tx.send(cid).await.is_err() {
                break;
            }
        }
    });

    for _ in 0..config.provide_workers {
        let work_rx = work_rx.clone();
        let routing = routing.clone();
        let limiter = limiter.clone();
        let cancel = cancel.clone();
        let provide_timeout = config.provide_timeout;
        tokio::spawn(async move {
            loop {
                let cid = {
                    let mut rx = work_rx.lock().await;
                    tokio::select! {
                        cid = rx.recv() => cid,
                        _ = cancel.cancelled() => None,
                    }
                };
                let Some(cid) = cid else {
                    break;
                };
                tokio::select! {
                    _ = limiter.acquire() => {}
                    _ = cancel.cancelled() => break,
                }
                match timeout(provide_timeout, routing.provide(&cid)).await {
                    Ok(Ok(())) => metric_inc!(PROVIDES, &["ok"]),
                    Ok(Err(e)) => {
                        metric_inc!(PROVIDES, &["failed"]);
                        warn!(cid = %cid, error = %e, "[bitswap] provide failed");
                    }
                    Err(_) => {
                        metric_inc!(PROVIDES, &["failed"]);
                        warn!(cid = %cid, "[bitswap] provide timed out");
                    }
                }
            }
        });
    }
}

async fn rebroadcast_worker(want_manager: WantManager, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = ticker.tick() => want_manager.rebroadcast().await,
            _ = cancel.cancelled() => break,
        }
    }
}

async fn provider_connector(
    mut requests: mpsc::Receiver<Cid>,
    routing: Arc<dyn ContentRouting>,
    network: Arc<dyn BitswapNetwork>,
    max: usize,
    search_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let cid = tokio::select! {
            cid = requests.recv() => match cid {
                Some(cid) => cid,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        let routing = routing.clone();
        let network = network.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                peers = connect_to_providers(routing.as_ref(), network.as_ref(), &cid, max, search_timeout) => {
                    debug!(cid = %cid, connected = peers.len(), "[bitswap] provider search done");
                }
                _ = cancel.cancelled() => {}
            }
        });
    }
}
