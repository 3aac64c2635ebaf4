//! Reprovider: periodically re-announces local content to the routing
//! system.
//!
//! Each cycle runs a [`KeyChooser`] producer and a provide consumer
//! concurrently, connected by a [`StreamingCidSet`], so the full key list
//! is never materialized.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bx_01_blockstore::Blockstore;
use bx_02_pinning::Pinner;
use bx_telemetry::metric_inc;
use bx_telemetry::metrics::PROVIDES;
use shared_types::{Cid, ContentRouting, LinkSource};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::{ReproviderConfig, ReproviderStrategy};
use crate::domain::errors::ProviderError;

const STREAM_BUFFER: usize = 256;

/// Deduplicating CID stream between a key producer and its consumer.
pub struct StreamingCidSet {
    seen: HashSet<Cid>,
    tx: mpsc::Sender<Cid>,
}

impl StreamingCidSet {
    pub fn new() -> (Self, mpsc::Receiver<Cid>) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (
            Self {
                seen: HashSet::new(),
                tx,
            },
            rx,
        )
    }

    /// Emit `cid` unless it was emitted before. Returns whether it was new;
    /// `Err` once the consumer has gone.
    pub async fn visit(&mut self, cid: Cid) -> Result<bool, ProviderError> {
        if !self.seen.insert(cid) {
            return Ok(false);
        }
        self.tx.send(cid).await.map_err(|_| ProviderError::Closed)?;
        Ok(true)
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.seen.contains(cid)
    }
}

/// Source of the CIDs announced in a cycle.
#[async_trait]
pub trait KeyChooser: Send + Sync {
    async fn choose(
        &self,
        out: &mut StreamingCidSet,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError>;
}

/// Every block in the blockstore.
pub struct AllKeysChooser {
    blockstore: Arc<dyn Blockstore>,
}

impl AllKeysChooser {
    pub fn new(blockstore: Arc<dyn Blockstore>) -> Self {
        Self { blockstore }
    }
}

#[async_trait]
impl KeyChooser for AllKeysChooser {
    async fn choose(
        &self,
        out: &mut StreamingCidSet,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let keys = self.blockstore.all_keys(cancel)?;
        for cid in keys {
            out.visit(cid).await?;
        }
        Ok(())
    }
}

/// Pinned content: direct pins and recursive roots, optionally with every
/// descendant of the recursive roots.
pub struct PinnedKeysChooser {
    pinner: Arc<Pinner>,
    links: Arc<dyn LinkSource>,
    roots_only: bool,
}

impl PinnedKeysChooser {
    pub fn new(pinner: Arc<Pinner>, links: Arc<dyn LinkSource>, roots_only: bool) -> Self {
        Self {
            pinner,
            links,
            roots_only,
        }
    }
}

#[async_trait]
impl KeyChooser for PinnedKeysChooser {
    async fn choose(
        &self,
        out: &mut StreamingCidSet,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        for cid in self.pinner.direct_keys() {
            out.visit(cid).await?;
        }

        for root in self.pinner.recursive_keys() {
            if self.roots_only {
                out.visit(root).await?;
                continue;
            }
            if out.contains(&root) {
                continue;
            }
            let mut stack = vec![root];
            out.visit(root).await?;
            while let Some(node) = stack.pop() {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                match self.links.get_links(&node).await {
                    Ok(children) => {
                        for child in children {
                            if out.visit(child).await? {
                                stack.push(child);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(cid = %node, error = %e, "[reprovider] skipping unresolvable node");
                    }
                }
            }
        }
        Ok(())
    }
}

/// Key chooser for `strategy`.
pub fn key_chooser(
    strategy: ReproviderStrategy,
    blockstore: Arc<dyn Blockstore>,
    pinner: Arc<Pinner>,
    links: Arc<dyn LinkSource>,
) -> Arc<dyn KeyChooser> {
    match strategy {
        ReproviderStrategy::All => Arc::new(AllKeysChooser::new(blockstore)),
        ReproviderStrategy::Pinned => Arc::new(PinnedKeysChooser::new(pinner, links, false)),
        ReproviderStrategy::Roots => Arc::new(PinnedKeysChooser::new(pinner, links, true)),
    }
}

pub struct Reprovider {
    routing: Arc<dyn ContentRouting>,
    chooser: Arc<dyn KeyChooser>,
    interval: Duration,
    triggers: mpsc::Sender<oneshot::Sender<Result<usize, ProviderError>>>,
    trigger_rx: parking_lot::Mutex<Option<mpsc::Receiver<oneshot::Sender<Result<usize, ProviderError>>>>>,
}

impl Reprovider {
    pub fn new(
        routing: Arc<dyn ContentRouting>,
        chooser: Arc<dyn KeyChooser>,
        config: &ReproviderConfig,
    ) -> Self {
        let (triggers, trigger_rx) = mpsc::channel(1);
        Self {
            routing,
            chooser,
            interval: config.interval,
            triggers,
            trigger_rx: parking_lot::Mutex::new(Some(trigger_rx)),
        }
    }

    /// Announce every chosen CID once. Individual provide failures are
    /// logged and skipped. Returns the number of successful provides.
    pub async fn reprovide(&self, cancel: &CancellationToken) -> Result<usize, ProviderError> {
        let (mut set, mut keys) = StreamingCidSet::new();
        let chooser = Arc::clone(&self.chooser);
        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            chooser.choose(&mut set, &producer_cancel).await
        });

        let mut provided = 0usize;
        let mut failed = 0usize;
        loop {
            let cid = tokio::select! {
                cid = keys.recv() => match cid {
                    Some(cid) => cid,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };
            match self.routing.provide(&cid).await {
                Ok(()) => {
                    provided += 1;
                    metric_inc!(PROVIDES, &["ok"]);
                }
                Err(e) => {
                    failed += 1;
                    metric_inc!(PROVIDES, &["failed"]);
                    debug!(cid = %cid, error = %e, "[reprovider] provide failed");
                }
            }
        }
        // Unblock the producer if we stopped early.
        drop(keys);

        match producer.await {
            Ok(Ok(())) | Ok(Err(ProviderError::Closed)) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => warn!(error = %e, "[reprovider] key producer panicked"),
        }
        info!(provided, failed, "[reprovider] cycle finished");
        Ok(provided)
    }

    /// Run a cycle now, waiting for it to finish.
    pub async fn trigger(&self) -> Result<usize, ProviderError> {
        let (reply, rx) = oneshot::channel();
        self.triggers
            .send(reply)
            .await
            .map_err(|_| ProviderError::Closed)?;
        rx.await.map_err(|_| ProviderError::Closed)?
    }

    /// Periodic loop. Returns when `cancel` fires.
    ///
    /// Only the first call runs; later calls return immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        let taken = self.trigger_rx.lock().take();
        let Some(mut triggers) = taken else {
            warn!("[reprovider] already running");
            return;
        };

        // A zero interval only serves manual triggers.
        let period = if self.interval.is_zero() {
            Duration::from_secs(365 * 24 * 3600)
        } else {
            self.interval
        };
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick(), if !self.interval.is_zero() => {
                    if let Err(e) = self.reprovide(&cancel).await {
                        warn!(error = %e, "[reprovider] cycle failed");
                    }
                }
                reply = triggers.recv() => {
                    let Some(reply) = reply else { break };
                    let _ = reply.send(self.reprovide(&cancel).await);
                }
                _ = cancel.cancelled() => break,
            }
        }
        debug!("[reprovider] stopped");
    }
}
