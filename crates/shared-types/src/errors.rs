//! # Error Types
//!
//! Errors raised by the shared ports and content types.

use cid::Cid;
use thiserror::Error;

/// Errors from a [`Datastore`](crate::datastore::Datastore) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatastoreError {
    /// No value is stored under the key.
    #[error("datastore: key not found")]
    NotFound,

    /// Underlying storage I/O failed.
    #[error("datastore I/O error: {message}")]
    Io { message: String },

    /// Stored bytes could not be decoded.
    #[error("datastore corruption: {message}")]
    Corruption { message: String },

    /// Key is not a valid datastore path.
    #[error("invalid datastore key: {key}")]
    InvalidKey { key: String },
}

impl DatastoreError {
    pub fn io(err: impl ToString) -> Self {
        DatastoreError::Io {
            message: err.to_string(),
        }
    }

    pub fn corruption(err: impl ToString) -> Self {
        DatastoreError::Corruption {
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::NotFound)
    }
}

impl From<std::io::Error> for DatastoreError {
    fn from(err: std::io::Error) -> Self {
        DatastoreError::io(err)
    }
}

/// Errors building or verifying a block.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlockError {
    /// Bytes do not hash to the CID's digest.
    #[error("block data does not match cid {cid}")]
    HashMismatch { cid: Cid },

    /// Multihash function this node cannot compute.
    #[error("unsupported multihash code 0x{code:x}")]
    UnsupportedHash { code: u64 },

    /// Identity digests are capped in length.
    #[error("identity digest too long: {len} bytes")]
    DigestTooLong { len: usize },

    /// CID bytes or multihash could not be parsed.
    #[error("invalid cid: {0}")]
    InvalidCid(String),
}

/// Errors resolving the links of a DAG node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DagError {
    /// The node is not available locally or remotely.
    #[error("dag node not found: {cid}")]
    NotFound { cid: Cid },

    /// The node bytes are not valid for its codec.
    #[error("failed to decode dag node {cid}: {message}")]
    Decode { cid: Cid, message: String },

    /// No link decoder exists for the codec.
    #[error("unsupported codec 0x{codec:x} for {cid}")]
    UnsupportedCodec { cid: Cid, codec: u64 },

    /// Fetching the node failed.
    #[error("failed to fetch {cid}: {message}")]
    Fetch { cid: Cid, message: String },
}

/// Errors from a [`ContentRouting`](crate::routing::ContentRouting) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("routing unavailable: {0}")]
    Unavailable(String),

    #[error("routing request timed out")]
    Timeout,

    #[error("peer not found")]
    NotFound,

    #[error("routing request canceled")]
    Canceled,
}
