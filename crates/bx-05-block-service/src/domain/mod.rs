//! Block service domain types.

pub mod errors;
pub mod filestore;

pub use errors::{BlockServiceError, Result};
pub use filestore::{filestore_key, FilestoreRef, FILESTORE_PREFIX};
