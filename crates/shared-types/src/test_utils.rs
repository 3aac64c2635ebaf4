//! Fixtures shared by the subsystem test suites.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use cid::Cid;
use rand::RngCore;

use crate::dag::PbNode;
use crate::datastore::{BatchOperation, Datastore, Key, Query, QueryResults};
use crate::entities::Block;
use crate::errors::DatastoreError;

/// Raw block of `size` random bytes.
pub fn random_block(size: usize) -> Block {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut data);
    Block::new(data).expect("sha2-256 is always supported")
}

pub fn random_blocks(count: usize, size: usize) -> Vec<Block> {
    (0..count).map(|_| random_block(size)).collect()
}

/// Deterministic raw block, useful when a test needs a stable CID.
pub fn raw_block(data: &str) -> Block {
    Block::new(Bytes::copy_from_slice(data.as_bytes())).expect("sha2-256 is always supported")
}

/// DAG-PB node named `name` linking to `children`.
pub fn dag_node(name: &str, children: &[&Block]) -> Block {
    let cids: Vec<Cid> = children.iter().map(|b| *b.cid()).collect();
    PbNode::new(name.as_bytes().to_vec(), &cids)
        .into_block()
        .expect("sha2-256 is always supported")
}

/// Datastore wrapper that counts calls per operation.
pub struct CountingDatastore<D> {
    inner: D,
    pub gets: AtomicUsize,
    pub has_calls: AtomicUsize,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub batches: AtomicUsize,
    pub queries: AtomicUsize,
}

impl<D: Datastore> CountingDatastore<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            has_calls: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn has_calls(&self) -> usize {
        self.has_calls.load(Ordering::SeqCst)
    }

    /// Single puts plus every put inside a batch.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        for counter in [
            &self.gets,
            &self.has_calls,
            &self.puts,
            &self.deletes,
            &self.batches,
            &self.queries,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

impl<D: Datastore> Datastore for CountingDatastore<D> {
    fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        self.has_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.has(key)
    }

    fn get_size(&self, key: &Key) -> Result<usize, DatastoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_size(key)
    }

    fn put(&self, key: &Key, value: Bytes) -> Result<(), DatastoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value)
    }

    fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn query(&self, query: &Query) -> Result<QueryResults, DatastoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(query)
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), DatastoreError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        for op in &operations {
            match op {
                BatchOperation::Put { .. } => self.puts.fetch_add(1, Ordering::SeqCst),
                BatchOperation::Delete { .. } => self.deletes.fetch_add(1, Ordering::SeqCst),
            };
        }
        self.inner.atomic_batch_write(operations)
    }
}
