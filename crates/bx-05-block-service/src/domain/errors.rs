//! Block service error types.

use bx_01_blockstore::BlockstoreError;
use bx_04_exchange::ExchangeError;
use shared_types::{BlockError, DatastoreError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlockServiceError {
    /// Not stored locally and no exchange to ask.
    #[error("block not found")]
    NotFound,

    #[error("request canceled")]
    Canceled,

    /// The block failed verification or does not decode for its kind.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// A filestore block was added but no filestore is configured.
    #[error("filestore is not enabled")]
    FilestoreDisabled,

    #[error("corrupt filestore reference: {0}")]
    CorruptReference(String),

    #[error(transparent)]
    Blockstore(#[from] BlockstoreError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error(transparent)]
    Exchange(ExchangeError),
}

impl From<ExchangeError> for BlockServiceError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Canceled => BlockServiceError::Canceled,
            ExchangeError::NotFound => BlockServiceError::NotFound,
            other => BlockServiceError::Exchange(other),
        }
    }
}

impl From<BlockError> for BlockServiceError {
    fn from(err: BlockError) -> Self {
        BlockServiceError::InvalidBlock(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BlockServiceError>;
