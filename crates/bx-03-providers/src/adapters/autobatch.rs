//! Write-batching datastore wrapper.
//!
//! Puts and deletes are buffered and written as one atomic batch once the
//! buffer holds `max_pending` operations, or on `flush`/`sync`. Reads see
//! the buffer first so callers observe their own writes.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use shared_types::{BatchOperation, Datastore, DatastoreError, Key, Query, QueryResults};
use tracing::debug;

pub struct AutoBatch<D: Datastore> {
    inner: D,
    /// `Some` is a pending put, `None` a pending delete.
    pending: Mutex<HashMap<Key, Option<Bytes>>>,
    max_pending: usize,
}

impl<D: Datastore> AutoBatch<D> {
    pub fn new(inner: D, max_pending: usize) -> Self {
        Self {
            inner,
            pending: Mutex::new(HashMap::new()),
            max_pending: max_pending.max(1),
        }
    }

    /// Write every buffered operation.
    pub fn flush(&self) -> Result<(), DatastoreError> {
        let mut pending = self.pending.lock();
        Self::write_out(&self.inner, &mut pending)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn write_out(inner: &D, pending: &mut HashMap<Key, Option<Bytes>>) -> Result<(), DatastoreError> {
        if pending.is_empty() {
            return Ok(());
        }
        let operations: Vec<BatchOperation> = pending
            .iter()
            .map(|(key, value)| match value {
                Some(value) => BatchOperation::put(key.clone(), value.clone()),
                None => BatchOperation::delete(key.clone()),
            })
            .collect();
        let count = operations.len();
        inner.atomic_batch_write(operations)?;
        pending.clear();
        debug!(count, "[providers] batch flushed");
        Ok(())
    }

    fn buffer(&self, key: &Key, value: Option<Bytes>) -> Result<(), DatastoreError> {
        let mut pending = self.pending.lock();
        pending.insert(key.clone(), value);
        if pending.len() >= self.max_pending {
            Self::write_out(&self.inner, &mut pending)?;
        }
        Ok(())
    }
}

impl<D: Datastore> Datastore for AutoBatch<D> {
    fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        if let Some(value) = self.pending.lock().get(key) {
            return value.clone().ok_or(DatastoreError::NotFound);
        }
        self.inner.get(key)
    }

    fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        if let Some(value) = self.pending.lock().get(key) {
            return Ok(value.is_some());
        }
        self.inner.has(key)
    }

    fn put(&self, key: &Key, value: Bytes) -> Result<(), DatastoreError> {
        self.buffer(key, Some(value))
    }

    fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        if !self.has(key)? {
            return Err(DatastoreError::NotFound);
        }
        self.buffer(key, None)
    }

    /// Flushes first so the query sees every buffered write.
    fn query(&self, query: &Query) -> Result<QueryResults, DatastoreError> {
        self.flush()?;
        self.inner.query(query)
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), DatastoreError> {
        self.flush()?;
        self.inner.atomic_batch_write(operations)
    }

    fn sync(&self) -> Result<(), DatastoreError> {
        self.flush()?;
        self.inner.sync()
    }
}
