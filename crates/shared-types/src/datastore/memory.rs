use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;
use parking_lot::RwLock;

use super::{BatchOperation, Datastore, Key, Query, QueryEntry, QueryResults};
use crate::errors::DatastoreError;

/// Ordered in-memory datastore.
///
/// Query results are a snapshot taken when the query starts.
#[derive(Default)]
pub struct MemoryDatastore {
    entries: RwLock<BTreeMap<Key, Bytes>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(super) fn snapshot(&self) -> BTreeMap<Key, Bytes> {
        self.entries.read().clone()
    }

    pub(super) fn restore(&self, entries: BTreeMap<Key, Bytes>) {
        *self.entries.write() = entries;
    }
}

/// Entries under `query.prefix` from an ordered map.
pub(super) fn scan(map: &BTreeMap<Key, Bytes>, query: &Query) -> Vec<QueryEntry> {
    map.range((Bound::Included(query.prefix.clone()), Bound::Unbounded))
        .take_while(|(key, _)| key.as_str().starts_with(query.prefix.as_str()))
        .filter(|(key, _)| query.matches(key))
        .map(|(key, value)| QueryEntry {
            key: key.clone(),
            value: (!query.keys_only).then(|| value.clone()),
        })
        .collect()
}

impl Datastore for MemoryDatastore {
    fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or(DatastoreError::NotFound)
    }

    fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        Ok(self.entries.read().contains_key(key))
    }

    fn put(&self, key: &Key, value: Bytes) -> Result<(), DatastoreError> {
        self.entries.write().insert(key.clone(), value);
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        self.entries
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or(DatastoreError::NotFound)
    }

    fn query(&self, query: &Query) -> Result<QueryResults, DatastoreError> {
        let results = scan(&self.entries.read(), query);
        Ok(Box::new(results.into_iter().map(Ok)))
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), DatastoreError> {
        let mut entries = self.entries.write();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
