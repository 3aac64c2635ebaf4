//! # Datastore Port
//!
//! Byte-valued key/value storage addressed by hierarchical [`Key`]s.
//!
//! Every persistent component (blockstore, pinner, provider store) writes
//! through this trait under its own key prefix. Adapters:
//!
//! - [`MemoryDatastore`] - ordered in-memory map (tests, ephemeral nodes)
//! - [`FileDatastore`] - in-memory map snapshotted to a single file
//! - `RocksDbDatastore` - production store, lives in `node-runtime`

mod file;
mod key;
mod memory;

use std::sync::Arc;

use bytes::Bytes;

pub use file::FileDatastore;
pub use key::{cid_to_segment, decode_b32, encode_b32, segment_to_cid, Key};
pub use memory::MemoryDatastore;

use crate::errors::DatastoreError;

/// A prefix query over the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Only keys at or below this prefix are returned.
    pub prefix: Key,
    /// Skip loading values.
    pub keys_only: bool,
}

impl Query {
    pub fn prefix(prefix: Key) -> Self {
        Self {
            prefix,
            keys_only: false,
        }
    }

    pub fn keys_only(prefix: Key) -> Self {
        Self {
            prefix,
            keys_only: true,
        }
    }

    /// Whether `key` falls inside this query's prefix.
    pub fn matches(&self, key: &Key) -> bool {
        self.prefix == *key || self.prefix.is_ancestor_of(key)
    }
}

/// One query result. `value` is `None` for keys-only queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEntry {
    pub key: Key,
    pub value: Option<Bytes>,
}

/// Lazy query results; iteration stops at the first error.
pub type QueryResults = Box<dyn Iterator<Item = Result<QueryEntry, DatastoreError>> + Send>;

/// Operations applied atomically by [`Datastore::atomic_batch_write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Put { key: Key, value: Bytes },
    Delete { key: Key },
}

impl BatchOperation {
    pub fn put(key: Key, value: impl Into<Bytes>) -> Self {
        Self::Put {
            key,
            value: value.into(),
        }
    }

    pub fn delete(key: Key) -> Self {
        Self::Delete { key }
    }

    pub fn key(&self) -> &Key {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Abstract key/value store.
///
/// Implementations provide their own interior synchronization.
pub trait Datastore: Send + Sync {
    /// Value for `key`, or [`DatastoreError::NotFound`].
    fn get(&self, key: &Key) -> Result<Bytes, DatastoreError>;

    fn has(&self, key: &Key) -> Result<bool, DatastoreError>;

    /// Size of the value for `key`, or [`DatastoreError::NotFound`].
    fn get_size(&self, key: &Key) -> Result<usize, DatastoreError> {
        self.get(key).map(|v| v.len())
    }

    fn put(&self, key: &Key, value: Bytes) -> Result<(), DatastoreError>;

    /// Remove `key`; [`DatastoreError::NotFound`] if it was absent.
    fn delete(&self, key: &Key) -> Result<(), DatastoreError>;

    /// Entries at or below `query.prefix`, in no particular order.
    fn query(&self, query: &Query) -> Result<QueryResults, DatastoreError>;

    /// Apply all operations or none.
    ///
    /// Deleting an absent key inside a batch is not an error.
    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), DatastoreError>;

    /// Persist buffered writes. Stores without buffering return immediately.
    fn sync(&self) -> Result<(), DatastoreError> {
        Ok(())
    }
}

impl<D: Datastore + ?Sized> Datastore for Arc<D> {
    fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        (**self).get(key)
    }

    fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        (**self).has(key)
    }

    fn get_size(&self, key: &Key) -> Result<usize, DatastoreError> {
        (**self).get_size(key)
    }

    fn put(&self, key: &Key, value: Bytes) -> Result<(), DatastoreError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        (**self).delete(key)
    }

    fn query(&self, query: &Query) -> Result<QueryResults, DatastoreError> {
        (**self).query(query)
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), DatastoreError> {
        (**self).atomic_batch_write(operations)
    }

    fn sync(&self) -> Result<(), DatastoreError> {
        (**self).sync()
    }
}

/// Collects operations and commits them in one atomic write.
pub struct Batch<'a> {
    store: &'a dyn Datastore,
    operations: Vec<BatchOperation>,
}

impl<'a> Batch<'a> {
    pub fn new(store: &'a dyn Datastore) -> Self {
        Self {
            store,
            operations: Vec::new(),
        }
    }

    pub fn put(&mut self, key: Key, value: impl Into<Bytes>) {
        self.operations.push(BatchOperation::put(key, value));
    }

    pub fn delete(&mut self, key: Key) {
        self.operations.push(BatchOperation::delete(key));
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn commit(self) -> Result<(), DatastoreError> {
        if self.operations.is_empty() {
            return Ok(());
        }
        self.store.atomic_batch_write(self.operations)
    }
}
