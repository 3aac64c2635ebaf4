//! Provider store.
//!
//! A single task owns the provider records; callers talk to it through a
//! cloneable [`ProviderManager`] handle. Hot CIDs keep their provider sets
//! in an LRU so repeated lookups do not scan the datastore. Expired
//! records are swept every `cleanup_interval`.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bx_telemetry::metric_add;
use bx_telemetry::metrics::PROVIDER_RECORDS_EXPIRED;
use lru::LruCache;
use shared_types::{Cid, Datastore, PeerId, Query, TimeSource};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::autobatch::AutoBatch;
use crate::domain::config::ProviderConfig;
use crate::domain::errors::ProviderError;
use crate::domain::records::{
    cid_prefix, decode_time, encode_time, parse_provider_key, provider_key, providers_prefix,
};

const COMMAND_BUFFER: usize = 64;

enum Command {
    Add {
        cid: Cid,
        peer: PeerId,
    },
    Get {
        cid: Cid,
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    Cleanup {
        reply: oneshot::Sender<usize>,
    },
    Close {
        reply: oneshot::Sender<Result<(), ProviderError>>,
    },
}

/// Providers of one CID with the time each was last seen, oldest first.
#[derive(Debug, Default, Clone)]
struct ProviderSet {
    entries: Vec<(PeerId, i64)>,
}

impl ProviderSet {
    fn set(&mut self, peer: PeerId, at: i64) {
        match self.entries.iter_mut().find(|(p, _)| *p == peer) {
            Some(entry) => entry.1 = at,
            None => self.entries.push((peer, at)),
        }
    }

    fn valid(&self, cutoff: i64) -> Vec<PeerId> {
        self.entries
            .iter()
            .filter(|(_, at)| *at >= cutoff)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Drop entries older than `cutoff`, returning how many went.
    fn expire(&mut self, cutoff: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, at)| *at >= cutoff);
        before - self.entries.len()
    }
}

/// Handle to the provider store task.
#[derive(Clone)]
pub struct ProviderManager {
    commands: mpsc::Sender<Command>,
}

impl ProviderManager {
    /// Spawn the store task on the current runtime.
    pub fn spawn(
        datastore: Arc<dyn Datastore>,
        config: ProviderConfig,
        time: Arc<dyn TimeSource>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let lru_size = NonZeroUsize::new(config.lru_size).unwrap_or(NonZeroUsize::MIN);
        let store = ProviderStore {
            datastore: AutoBatch::new(datastore, config.batch_size),
            cache: LruCache::new(lru_size),
            config,
            time,
        };
        tokio::spawn(store.run(rx, cancel));
        Self { commands: tx }
    }

    /// Record that `peer` provides `cid`, refreshing its timestamp.
    pub async fn add_provider(&self, cid: Cid, peer: PeerId) -> Result<(), ProviderError> {
        self.commands
            .send(Command::Add { cid, peer })
            .await
            .map_err(|_| ProviderError::Closed)
    }

    /// Providers of `cid` whose records are still valid.
    pub async fn get_providers(&self, cid: &Cid) -> Result<Vec<PeerId>, ProviderError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Get { cid: *cid, reply })
            .await
            .map_err(|_| ProviderError::Closed)?;
        rx.await.map_err(|_| ProviderError::Closed)
    }

    /// Run an expiry sweep now. Returns the number of records removed.
    pub async fn cleanup(&self) -> Result<usize, ProviderError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Cleanup { reply })
            .await
            .map_err(|_| ProviderError::Closed)?;
        rx.await.map_err(|_| ProviderError::Closed)
    }

    /// Flush buffered records and stop the task.
    pub async fn close(&self) -> Result<(), ProviderError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Close { reply })
            .await
            .map_err(|_| ProviderError::Closed)?;
        rx.await.map_err(|_| ProviderError::Closed)?
    }
}

struct ProviderStore {
    datastore: AutoBatch<Arc<dyn Datastore>>,
    cache: LruCache<Cid, ProviderSet>,
    config: ProviderConfig,
    time: Arc<dyn TimeSource>,
}

impl ProviderStore {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let period = self.config.cleanup_interval;
        let mut sweep = interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Add { cid, peer }) => {
                        if let Err(e) = self.add(cid, peer) {
                            warn!(cid = %cid, error = %e, "[providers] failed to record provider");
                        }
                    }
                    Some(Command::Get { cid, reply }) => {
                        let _ = reply.send(self.providers(&cid));
                    }
                    Some(Command::Cleanup { reply }) => {
                        let _ = reply.send(self.cleanup());
                    }
                    Some(Command::Close { reply }) => {
                        let _ = reply.send(self.datastore.sync().map_err(Into::into));
                        break;
                    }
                    None => break,
                },
                _ = sweep.tick() => {
                    self.cleanup();
                }
                _ = cancel.cancelled() => break,
            }
        }

        if let Err(e) = self.datastore.sync() {
            warn!(error = %e, "[providers] final flush failed");
        }
        debug!("[providers] store stopped");
    }

    fn cutoff(&self) -> i64 {
        let validity = i64::try_from(self.config.provide_validity.as_nanos()).unwrap_or(i64::MAX);
        self.time.now_unix_nanos().saturating_sub(validity)
    }

    fn add(&mut self, cid: Cid, peer: PeerId) -> Result<(), ProviderError> {
        let now = self.time.now_unix_nanos();
        self.datastore
            .put(&provider_key(&cid, &peer), encode_time(now))?;

        if let Some(set) = self.cache.get_mut(&cid) {
            set.set(peer, now);
            return Ok(());
        }
        // The record is durable; a set that cannot be loaded is simply not
        // cached and gets read again on the next lookup.
        match self.load(&cid) {
            Ok(set) => {
                self.cache.put(cid, set);
            }
            Err(e) => warn!(cid = %cid, error = %e, "[providers] provider set not cached"),
        }
        Ok(())
    }

    fn providers(&mut self, cid: &Cid) -> Vec<PeerId> {
        let cutoff = self.cutoff();
        if let Some(set) = self.cache.get(cid) {
            return set.valid(cutoff);
        }
        match self.load(cid) {
            Ok(set) => {
                let peers = set.valid(cutoff);
                self.cache.put(*cid, set);
                peers
            }
            Err(e) => {
                warn!(cid = %cid, error = %e, "[providers] failed to load provider set");
                Vec::new()
            }
        }
    }

    /// Read every record for `cid`, deleting expired or unreadable ones.
    fn load(&self, cid: &Cid) -> Result<ProviderSet, ProviderError> {
        let cutoff = self.cutoff();
        let mut set = ProviderSet::default();
        for entry in self.datastore.query(&Query::prefix(cid_prefix(cid)))? {
            let entry = entry?;
            let record = parse_provider_key(&entry.key).and_then(|(_, peer)| {
                let value = entry.value.as_deref().unwrap_or_default();
                Ok((peer, decode_time(value)?))
            });
            match record {
                Ok((peer, at)) if at >= cutoff => set.set(peer, at),
                Ok(_) => self.datastore.delete(&entry.key)?,
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "[providers] dropping unreadable record");
                    self.datastore.delete(&entry.key)?;
                }
            }
        }
        set.entries.sort_by_key(|(_, at)| *at);
        Ok(set)
    }

    fn cleanup(&mut self) -> usize {
        let cutoff = self.cutoff();
        let mut expired = 0usize;

        // In-memory sets first; empty buckets are dropped.
        let mut empty = Vec::new();
        for (cid, set) in self.cache.iter_mut() {
            set.expire(cutoff);
            if set.entries.is_empty() {
                empty.push(*cid);
            }
        }
        for cid in empty {
            self.cache.pop(&cid);
        }

        let entries = match self.datastore.query(&Query::prefix(providers_prefix())) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "[providers] cleanup query failed");
                return 0;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "[providers] cleanup aborted");
                    break;
                }
            };
            let stale = match decode_time(entry.value.as_deref().unwrap_or_default()) {
                Ok(at) => at < cutoff,
                Err(_) => true,
            };
            if stale {
                match self.datastore.delete(&entry.key) {
                    Ok(()) => expired += 1,
                    Err(e) => warn!(key = %entry.key, error = %e, "[providers] failed to delete record"),
                }
            }
        }

        if let Err(e) = self.datastore.flush() {
            warn!(error = %e, "[providers] cleanup flush failed");
        }
        metric_add!(PROVIDER_RECORDS_EXPIRED, expired as f64);
        info!(expired, "[providers] cleanup finished");
        expired
    }
}
