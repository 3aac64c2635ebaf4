//! Shared request path for plain and session fetches.
//!
//! A fetch subscribes to the notifier before wanting anything, serves what
//! is already stored, wants the rest through a [`WantSink`] and forwards
//! arrivals to the caller. The fetch ends when the caller drops the stream,
//! when either token fires or when everything arrived; the sink is then
//! told which CIDs are still outstanding.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bx_01_blockstore::{Blockstore, BlockstoreError};
use futures::StreamExt;
use shared_bus::{BlockPublisher, InMemoryNotifier};
use shared_types::{Cid, ContentRouting, PeerId};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::ExchangeError;
use crate::ports::inbound::BlockStream;
use crate::ports::outbound::BitswapNetwork;

/// Where a fetch registers and releases its wants.
#[async_trait]
pub(crate) trait WantSink: Send + Sync + 'static {
    async fn want(&self, cids: Vec<Cid>);

    /// The fetch ended with `remaining` undelivered.
    async fn finish(&self, remaining: Vec<Cid>);
}

pub(crate) async fn fetch_blocks(
    notifier: &Arc<InMemoryNotifier>,
    blockstore: &Arc<dyn Blockstore>,
    cids: Vec<Cid>,
    cancel: CancellationToken,
    scope: &CancellationToken,
    sink: Arc<dyn WantSink>,
) -> Result<BlockStream, ExchangeError> {
    if notifier.is_closed() {
        return Err(ExchangeError::Closed);
    }
    if cancel.is_cancelled() || scope.is_cancelled() {
        return Err(ExchangeError::Canceled);
    }

    let mut seen = HashSet::new();
    let cids: Vec<Cid> = cids.into_iter().filter(|c| seen.insert(*c)).collect();
    let mut subscription = notifier.subscribe(cids.iter().copied());

    let mut missing = Vec::new();
    for cid in &cids {
        match blockstore.get(cid) {
            Ok(block) => {
                notifier.publish(&block);
            }
            Err(BlockstoreError::NotFound) => missing.push(*cid),
            Err(e) => {
                warn!(cid = %cid, error = %e, "[bitswap] local lookup failed, asking the network");
                missing.push(*cid);
            }
        }
    }
    if !missing.is_empty() {
        sink.want(missing).await;
    }

    let (tx, rx) = mpsc::channel(cids.len().max(1));
    let scope = scope.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                block = subscription.recv() => match block {
                    Some(block) => {
                        if tx.send(block).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = cancel.cancelled() => break,
                _ = scope.cancelled() => break,
                _ = tx.closed() => break,
            }
        }
        let remaining = subscription.pending();
        drop(subscription);
        sink.finish(remaining).await;
    });

    Ok(ReceiverStream::new(rx).boxed())
}

/// Look up providers of `cid` and connect to each. Returns the peers that
/// connected. The whole search is bounded by `search_timeout`.
pub(crate) async fn connect_to_providers(
    routing: &dyn ContentRouting,
    network: &dyn BitswapNetwork,
    cid: &Cid,
    max: usize,
    search_timeout: Duration,
) -> Vec<PeerId> {
    let local = network.local_peer();
    let mut providers = routing.find_providers(cid, max);
    let mut connected = Vec::new();
    let search = async {
        while let Some(info) = providers.next().await {
            if info.id == local {
                continue;
            }
            match network.connect_to(&info.id).await {
                Ok(()) => connected.push(info.id),
                Err(e) => debug!(peer = %info.id, error = %e, "[bitswap] cannot reach provider"),
            }
        }
    };
    if tokio::time::timeout(search_timeout, search).await.is_err() {
        debug!(cid = %cid, "[bitswap] provider search timed out");
    }
    connected
}
