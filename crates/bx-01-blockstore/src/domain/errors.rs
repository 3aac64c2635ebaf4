//! # Blockstore Errors

use shared_types::{Cid, DatastoreError};
use thiserror::Error;

/// Errors returned by every [`Blockstore`](crate::ports::inbound::Blockstore) layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlockstoreError {
    /// No block is stored under the CID.
    #[error("blockstore: block not found")]
    NotFound,

    /// Stored bytes do not hash to the CID. The block is left in place.
    #[error("blockstore: block in storage has different hash than requested ({cid})")]
    HashMismatch { cid: Cid },

    /// Empty or malformed CID; the datastore was not consulted.
    #[error("blockstore: invalid key: {reason}")]
    InvalidKey { reason: String },

    /// The backing datastore failed.
    #[error("blockstore: {0}")]
    Datastore(DatastoreError),

    /// The caller's cancellation token fired.
    #[error("blockstore: operation canceled")]
    Canceled,
}

impl BlockstoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockstoreError::NotFound)
    }
}

impl From<DatastoreError> for BlockstoreError {
    fn from(err: DatastoreError) -> Self {
        match err {
            DatastoreError::NotFound => BlockstoreError::NotFound,
            other => BlockstoreError::Datastore(other),
        }
    }
}
