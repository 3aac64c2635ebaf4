//! # Inbound Ports
//!
//! The block storage API. The base store and each cache layer implement
//! the same trait so layers stack transparently.

use std::sync::Arc;

use shared_types::{Block, Cid};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::BlockstoreError;

pub type Result<T> = std::result::Result<T, BlockstoreError>;

/// Lazy stream of stored CIDs. Ends early on datastore error or cancellation.
pub type AllKeys = Box<dyn Iterator<Item = Cid> + Send>;

/// Content-addressed block storage.
///
/// Implementations synchronize internally and are shared behind `Arc`.
pub trait Blockstore: Send + Sync {
    fn has(&self, cid: &Cid) -> Result<bool>;

    /// Block stored under `cid`.
    ///
    /// ## Errors
    ///
    /// - `NotFound`: nothing stored (also for the empty CID)
    /// - `HashMismatch`: hash-on-read is enabled and the bytes do not match
    fn get(&self, cid: &Cid) -> Result<Block>;

    /// Stored size in bytes, or `NotFound`.
    fn get_size(&self, cid: &Cid) -> Result<usize>;

    /// Store a block. Storing a block that is already present is a no-op.
    fn put(&self, block: Block) -> Result<()>;

    /// Store several blocks in one atomic datastore batch.
    fn put_many(&self, blocks: Vec<Block>) -> Result<()>;

    /// Remove a block. `NotFound` if absent.
    fn delete(&self, cid: &Cid) -> Result<()>;

    /// Every stored CID, once each.
    fn all_keys(&self, cancel: &CancellationToken) -> Result<AllKeys>;

    /// Toggle digest verification on `get`.
    fn hash_on_read(&self, enabled: bool);
}

impl<B: Blockstore + ?Sized> Blockstore for Arc<B> {
    fn has(&self, cid: &Cid) -> Result<bool> {
        (**self).has(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Block> {
        (**self).get(cid)
    }

    fn get_size(&self, cid: &Cid) -> Result<usize> {
        (**self).get_size(cid)
    }

    fn put(&self, block: Block) -> Result<()> {
        (**self).put(block)
    }

    fn put_many(&self, blocks: Vec<Block>) -> Result<()> {
        (**self).put_many(blocks)
    }

    fn delete(&self, cid: &Cid) -> Result<()> {
        (**self).delete(cid)
    }

    fn all_keys(&self, cancel: &CancellationToken) -> Result<AllKeys> {
        (**self).all_keys(cancel)
    }

    fn hash_on_read(&self, enabled: bool) {
        (**self).hash_on_read(enabled)
    }
}
