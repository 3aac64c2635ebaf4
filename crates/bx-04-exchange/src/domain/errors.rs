//! Exchange error types.

use bx_01_blockstore::BlockstoreError;
use shared_types::PeerId;
use thiserror::Error;

/// Wire message could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Decode(String),

    #[error("incorrectly formatted cid in wantlist: {0}")]
    InvalidCid(String),

    #[error("invalid block prefix: {0}")]
    InvalidPrefix(String),
}

impl From<prost::DecodeError> for MessageError {
    fn from(err: prost::DecodeError) -> Self {
        MessageError::Decode(err.to_string())
    }
}

/// Transport failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),

    #[error("network operation timed out")]
    Timeout,

    #[error("network is closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Errors surfaced to exchange callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("request canceled")]
    Canceled,

    #[error("exchange is closed")]
    Closed,

    #[error("block not found")]
    NotFound,

    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Blockstore(#[from] BlockstoreError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Invalid exchange configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
