//! Link resolution that never leaves the local blockstore.
//!
//! The collector marks through this adapter: a block missing locally must
//! not trigger a network fetch while the GC lock is held.

use std::sync::Arc;

use async_trait::async_trait;
use bx_01_blockstore::{Blockstore, BlockstoreError};
use shared_types::{links, Cid, DagError, LinkSource};

pub struct OfflineLinks {
    blockstore: Arc<dyn Blockstore>,
}

impl OfflineLinks {
    pub fn new(blockstore: Arc<dyn Blockstore>) -> Self {
        Self { blockstore }
    }
}

#[async_trait]
impl LinkSource for OfflineLinks {
    async fn get_links(&self, cid: &Cid) -> Result<Vec<Cid>, DagError> {
        let block = self.blockstore.get(cid).map_err(|e| match e {
            BlockstoreError::NotFound => DagError::NotFound { cid: *cid },
            other => DagError::Fetch {
                cid: *cid,
                message: other.to_string(),
            },
        })?;
        links(&block)
    }
}
