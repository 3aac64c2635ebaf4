//! # Pinning and GC Errors

use bx_01_blockstore::BlockstoreError;
use shared_types::{Cid, DagError, DatastoreError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PinError {
    #[error("not pinned")]
    NotPinned,

    /// The requested change contradicts the existing pin.
    #[error("{cid} {reason}")]
    PinConflict { cid: Cid, reason: String },

    #[error("{cid} already pinned recursively")]
    AlreadyPinned { cid: Cid },

    /// Persisted pin state could not be decoded.
    #[error("pin state corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Blockstore(#[from] BlockstoreError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

/// Errors emitted on the GC output channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GcError {
    /// Links of a node could not be resolved while marking.
    #[error("could not retrieve links for {cid}: {reason}")]
    CannotFetchLinks { cid: Cid, reason: String },

    #[error("could not remove {cid}: {reason}")]
    CannotDeleteBlock { cid: Cid, reason: String },

    /// Marking failed; nothing was deleted.
    #[error("garbage collection aborted: could not retrieve some links")]
    CannotFetchAllLinks,

    /// The sweep finished but some deletions failed.
    #[error("garbage collection incomplete: could not delete some blocks")]
    CannotDeleteSomeBlocks,

    /// Enumerating the blockstore failed.
    #[error("garbage collection aborted: {0}")]
    Blockstore(#[from] BlockstoreError),
}

pub type GcResult = Result<Cid, GcError>;
