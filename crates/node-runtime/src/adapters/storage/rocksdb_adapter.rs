//! # RocksDB Datastore
//!
//! RocksDB implementation of the [`Datastore`] port.
//!
//! ## Features
//!
//! - Atomic batch writes (WriteBatch)
//! - Snappy compression
//! - Bloom filters for read optimization
//! - Prefix queries that read the keyspace in chunks, so a query over a
//!   large blockstore never materializes the whole result
//!
//! Keys are stored as their path bytes in the default column family, which
//! keeps RocksDB's bytewise ordering identical to [`Key`] ordering.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use shared_types::{BatchOperation, Datastore, DatastoreError, Key, Query, QueryEntry, QueryResults};
use tracing::info;

/// Entries read from RocksDB per iterator pass.
const QUERY_CHUNK: usize = 512;

/// RocksDB configuration.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory
    pub path: PathBuf,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 64MB)
    pub write_buffer_size: usize,
    /// Maximum number of write buffers (default: 3)
    pub max_write_buffer_number: i32,
    /// Enable fsync after each write (default: true for durability)
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/rocksdb"),
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Create config for testing (smaller buffers, no sync)
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            sync_writes: false,
        }
    }
}

/// RocksDB-backed datastore.
pub struct RocksDbDatastore {
    db: Arc<DB>,
    config: RocksDbConfig,
}

fn io_error(op: &str, e: rocksdb::Error) -> DatastoreError {
    DatastoreError::io(format!("RocksDB {op} failed: {e}"))
}

impl RocksDbDatastore {
    /// Open or create a RocksDB database
    pub fn open(config: RocksDbConfig) -> Result<Self, DatastoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(DBCompressionType::Snappy);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, &config.path).map_err(|e| io_error("open", e))?;
        info!(path = %config.path.display(), "[datastore] RocksDB opened");
        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    /// Open with default tuning.
    pub fn open_default(path: impl AsRef<Path>) -> Result<Self, DatastoreError> {
        Self::open(RocksDbConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }
}

impl Datastore for RocksDbDatastore {
    fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        self.db
            .get(key.as_bytes())
            .map_err(|e| io_error("get", e))?
            .map(Bytes::from)
            .ok_or(DatastoreError::NotFound)
    }

    fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        Ok(self
            .db
            .get_pinned(key.as_bytes())
            .map_err(|e| io_error("get", e))?
            .is_some())
    }

    fn get_size(&self, key: &Key) -> Result<usize, DatastoreError> {
        self.db
            .get_pinned(key.as_bytes())
            .map_err(|e| io_error("get", e))?
            .map(|v| v.len())
            .ok_or(DatastoreError::NotFound)
    }

    fn put(&self, key: &Key, value: Bytes) -> Result<(), DatastoreError> {
        self.db
            .put_opt(key.as_bytes(), &value, &self.write_opts())
            .map_err(|e| io_error("put", e))
    }

    fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        self.db
            .delete_opt(key.as_bytes(), &self.write_opts())
            .map_err(|e| io_error("delete", e))
    }

    fn query(&self, query: &Query) -> Result<QueryResults, DatastoreError> {
        Ok(Box::new(PrefixScan {
            db: Arc::clone(&self.db),
            prefix: query.prefix.as_bytes().to_vec(),
            query: query.clone(),
            next_start: Some(query.prefix.as_bytes().to_vec()),
            buffer: VecDeque::new(),
        }))
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), DatastoreError> {
        let mut batch = WriteBatch::default();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => batch.put(key.as_bytes(), &value),
                BatchOperation::Delete { key } => batch.delete(key.as_bytes()),
            }
        }
        self.db
            .write_opt(batch, &self.write_opts())
            .map_err(|e| io_error("batch write", e))
    }

    fn sync(&self) -> Result<(), DatastoreError> {
        self.db.flush().map_err(|e| io_error("flush", e))
    }
}

/// Lazy prefix query. Each refill opens a fresh iterator at the first
/// unread key and reads at most [`QUERY_CHUNK`] entries.
struct PrefixScan {
    db: Arc<DB>,
    prefix: Vec<u8>,
    query: Query,
    /// `None` once the prefix range is exhausted.
    next_start: Option<Vec<u8>>,
    buffer: VecDeque<Result<QueryEntry, DatastoreError>>,
}

impl PrefixScan {
    fn refill(&mut self) {
        let Some(start) = self.next_start.take() else {
            return;
        };
        let iter = self.db.iterator(IteratorMode::From(&start, Direction::Forward));
        for (read, item) in iter.enumerate() {
            let (raw_key, value) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    self.buffer.push_back(Err(io_error("iterate", e)));
                    return;
                }
            };
            if !raw_key.starts_with(&self.prefix) {
                return;
            }
            if read == QUERY_CHUNK {
                self.next_start = Some(raw_key.to_vec());
                return;
            }
            let key = match Key::from_bytes(&raw_key) {
                Ok(key) => key,
                Err(e) => {
                    self.buffer.push_back(Err(e));
                    return;
                }
            };
            if !self.query.matches(&key) {
                continue;
            }
            self.buffer.push_back(Ok(QueryEntry {
                key,
                value: (!self.query.keys_only).then(|| Bytes::from(value.into_vec())),
            }));
        }
    }
}

impl Iterator for PrefixScan {
    type Item = Result<QueryEntry, DatastoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() && self.next_start.is_some() {
            self.refill();
        }
        let item = self.buffer.pop_front()?;
        if item.is_err() {
            // Stop after the first error.
            self.next_start = None;
            self.buffer.clear();
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RocksDbDatastore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksDbDatastore::open(RocksDbConfig::for_testing(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_delete() {
        let (_dir, store) = open_temp();
        let key = Key::new("/blocks/abc");
        store.put(&key, Bytes::from_static(b"beep")).unwrap();
        assert_eq!(store.get(&key).unwrap(), Bytes::from_static(b"beep"));
        assert!(store.has(&key).unwrap());
        assert_eq!(store.get_size(&key).unwrap(), 4);

        store.delete(&key).unwrap();
        assert!(!store.has(&key).unwrap());
        assert_eq!(store.get(&key), Err(DatastoreError::NotFound));
    }

    #[test]
    fn test_query_spans_chunks_and_respects_prefix() {
        let (_dir, store) = open_temp();
        let total = QUERY_CHUNK * 2 + 7;
        let ops = (0..total)
            .map(|i| BatchOperation::put(Key::new(format!("/blocks/{i:05}")), vec![1u8]))
            .chain([
                BatchOperation::put(Key::new("/blocksx/1"), vec![2u8]),
                BatchOperation::put(Key::new("/pins"), vec![3u8]),
            ])
            .collect();
        store.atomic_batch_write(ops).unwrap();

        let keys: Vec<Key> = store
            .query(&Query::keys_only(Key::new("/blocks")))
            .unwrap()
            .map(|e| e.unwrap().key)
            .collect();
        assert_eq!(keys.len(), total);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let entry = store
            .query(&Query::prefix(Key::new("/pins")))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(entry.value, Some(Bytes::from_static(&[3])));
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let key = Key::new("/pins/state");
        {
            let store = RocksDbDatastore::open(RocksDbConfig::for_testing(dir.path())).unwrap();
            store.put(&key, Bytes::from_static(b"state")).unwrap();
            store.sync().unwrap();
        }
        let store = RocksDbDatastore::open(RocksDbConfig::for_testing(dir.path())).unwrap();
        assert_eq!(store.get(&key).unwrap(), Bytes::from_static(b"state"));
    }
}
