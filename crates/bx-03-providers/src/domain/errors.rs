//! # Provider Errors

use bx_01_blockstore::BlockstoreError;
use shared_types::{DatastoreError, RoutingError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider manager or reprovider has shut down.
    #[error("provider service closed")]
    Closed,

    /// A provider record could not be decoded.
    #[error("bad provider record: {0}")]
    BadRecord(String),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error(transparent)]
    Blockstore(#[from] BlockstoreError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}
