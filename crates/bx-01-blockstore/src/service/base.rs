//! Base blockstore: maps CIDs onto datastore keys under `/blocks`.

use std::sync::atomic::{AtomicBool, Ordering};

use bx_telemetry::metrics::{BLOCKS_DELETED, BLOCKS_STORED, HASH_MISMATCHES};
use bx_telemetry::{metric_add, metric_inc};
use shared_types::{is_empty_cid, Block, BlockError, Cid, Datastore, Query};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::BlockstoreError;
use crate::domain::keys::{block_prefix, cid_to_key, key_to_cid};
use crate::ports::inbound::{AllKeys, Blockstore, Result};

/// Blockstore writing raw block bytes straight into a [`Datastore`].
pub struct BaseBlockstore<D: Datastore> {
    datastore: D,
    rehash: AtomicBool,
}

impl<D: Datastore> BaseBlockstore<D> {
    pub fn new(datastore: D) -> Self {
        Self {
            datastore,
            rehash: AtomicBool::new(false),
        }
    }

    pub fn datastore(&self) -> &D {
        &self.datastore
    }

    fn check_first(&self, cid: &Cid) -> Result<bool> {
        Ok(self.datastore.has(&cid_to_key(cid))?)
    }
}

fn reject_empty(cid: &Cid) -> Result<()> {
    if is_empty_cid(cid) {
        return Err(BlockstoreError::InvalidKey {
            reason: format!("empty digest in {cid}"),
        });
    }
    Ok(())
}

impl<D: Datastore> Blockstore for BaseBlockstore<D> {
    fn has(&self, cid: &Cid) -> Result<bool> {
        if is_empty_cid(cid) {
            return Ok(false);
        }
        self.check_first(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Block> {
        if is_empty_cid(cid) {
            return Err(BlockstoreError::NotFound);
        }

        let data = self.datastore.get(&cid_to_key(cid))?;
        let block = Block::with_cid(*cid, data);

        if self.rehash.load(Ordering::Relaxed) {
            if let Err(e) = block.verify() {
                metric_inc!(HASH_MISMATCHES);
                warn!(cid = %cid, error = %e, "[blockstore] stored block failed verification");
                return Err(match e {
                    BlockError::HashMismatch { cid } => BlockstoreError::HashMismatch { cid },
                    other => BlockstoreError::InvalidKey {
                        reason: other.to_string(),
                    },
                });
            }
        }
        Ok(block)
    }

    fn get_size(&self, cid: &Cid) -> Result<usize> {
        if is_empty_cid(cid) {
            return Err(BlockstoreError::NotFound);
        }
        Ok(self.datastore.get_size(&cid_to_key(cid))?)
    }

    fn put(&self, block: Block) -> Result<()> {
        reject_empty(block.cid())?;

        let key = cid_to_key(block.cid());
        if self.datastore.has(&key)? {
            return Ok(());
        }
        self.datastore.put(&key, block.into_data())?;
        metric_inc!(BLOCKS_STORED);
        Ok(())
    }

    fn put_many(&self, blocks: Vec<Block>) -> Result<()> {
        let mut batch = Vec::with_capacity(blocks.len());
        for block in blocks {
            reject_empty(block.cid())?;
            let key = cid_to_key(block.cid());
            if self.datastore.has(&key)? {
                continue;
            }
            batch.push(shared_types::BatchOperation::put(key, block.into_data()));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let written = batch.len();
        self.datastore.atomic_batch_write(batch)?;
        metric_add!(BLOCKS_STORED, written as f64);
        debug!(count = written, "[blockstore] batch written");
        Ok(())
    }

    fn delete(&self, cid: &Cid) -> Result<()> {
        if is_empty_cid(cid) {
            return Err(BlockstoreError::NotFound);
        }
        self.datastore.delete(&cid_to_key(cid))?;
        metric_inc!(BLOCKS_DELETED);
        Ok(())
    }

    fn all_keys(&self, cancel: &CancellationToken) -> Result<AllKeys> {
        let entries = self.datastore.query(&Query::keys_only(block_prefix()))?;
        let cancel = cancel.clone();

        let keys = entries
            .take_while(move |_| !cancel.is_cancelled())
            .map_while(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "[blockstore] key enumeration stopped");
                    None
                }
            })
            .filter_map(|entry| match key_to_cid(&entry.key) {
                Ok(cid) => Some(cid),
                Err(e) => {
                    warn!(key = %entry.key.as_str(), error = %e, "[blockstore] skipping malformed key");
                    None
                }
            });
        Ok(Box::new(keys))
    }

    fn hash_on_read(&self, enabled: bool) {
        self.rehash.store(enabled, Ordering::Relaxed);
    }
}
