//! # Storage Adapters
//!
//! Datastore backends selected by [`DatastoreConfig`].
//!
//! | Backend | Adapter | Notes |
//! |---------|---------|-------|
//! | `memory` | `MemoryDatastore` | lost on exit |
//! | `file` | `FileDatastore` | snapshot file, small nodes |
//! | `rocksdb` | [`RocksDbDatastore`] | needs the `rocksdb` feature |
//!
//! ```toml
//! node-runtime = { path = "...", features = ["rocksdb"] }
//! ```

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

#[cfg(feature = "rocksdb")]
pub use rocksdb_adapter::{RocksDbConfig, RocksDbDatastore};

use std::sync::Arc;

use shared_types::{Datastore, DatastoreError, FileDatastore, MemoryDatastore};

use crate::container::config::{DatastoreBackend, DatastoreConfig};

/// Open the configured backend.
pub fn open_datastore(config: &DatastoreConfig) -> Result<Arc<dyn Datastore>, DatastoreError> {
    match config.backend {
        DatastoreBackend::Memory => Ok(Arc::new(MemoryDatastore::new())),
        DatastoreBackend::File => Ok(Arc::new(FileDatastore::open(&config.path)?)),
        #[cfg(feature = "rocksdb")]
        DatastoreBackend::RocksDb => Ok(Arc::new(RocksDbDatastore::open_default(&config.path)?)),
        #[cfg(not(feature = "rocksdb"))]
        DatastoreBackend::RocksDb => Err(DatastoreError::io("RocksDB support not compiled in")),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use shared_types::Key;

    use super::*;

    #[test]
    fn test_file_backend_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatastoreConfig {
            backend: DatastoreBackend::File,
            path: dir.path().join("blocks.db"),
        };
        let key = Key::new("/blocks/x");
        open_datastore(&config)
            .unwrap()
            .put(&key, Bytes::from_static(b"x"))
            .unwrap();

        let reopened = open_datastore(&config).unwrap();
        assert_eq!(reopened.get(&key).unwrap(), Bytes::from_static(b"x"));
    }

    #[test]
    fn test_memory_backend_starts_empty() {
        let store = open_datastore(&DatastoreConfig::default()).unwrap();
        assert!(!store.has(&Key::new("/blocks/x")).unwrap());
    }
}
