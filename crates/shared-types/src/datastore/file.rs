use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;

use super::memory::scan;
use super::{BatchOperation, Datastore, Key, MemoryDatastore, Query, QueryResults};
use crate::errors::DatastoreError;

/// File-backed datastore.
///
/// Holds the whole keyspace in memory and rewrites a snapshot file after
/// every mutation. Suitable for small nodes and tests; large stores should
/// use RocksDB.
///
/// Snapshot format: repeated `[key_len:u32 LE][key][value_len:u32 LE][value]`.
pub struct FileDatastore {
    inner: MemoryDatastore,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDatastore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatastoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let entries = Self::load_from_file(&path)?;
            tracing::info!(
                "[datastore] Loaded {} keys from {}",
                entries.len(),
                path.display()
            );
            entries
        } else {
            tracing::info!("[datastore] No existing datastore file at {}", path.display());
            BTreeMap::new()
        };

        let inner = MemoryDatastore::new();
        inner.restore(entries);
        Ok(Self {
            inner,
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_file(path: &Path) -> Result<BTreeMap<Key, Bytes>, DatastoreError> {
        let mut file = std::fs::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut entries = BTreeMap::new();
        let mut cursor = 0;
        while cursor < bytes.len() {
            let Some(key) = read_chunk(&bytes, &mut cursor) else {
                tracing::warn!(
                    offset = cursor,
                    "[datastore] Truncated snapshot, ignoring trailing bytes"
                );
                break;
            };
            let Some(value) = read_chunk(&bytes, &mut cursor) else {
                tracing::warn!(
                    offset = cursor,
                    "[datastore] Truncated snapshot, ignoring trailing bytes"
                );
                break;
            };
            entries.insert(Key::from_bytes(key)?, Bytes::copy_from_slice(value));
        }
        Ok(entries)
    }

    /// Apply `change` to a copy of the keyspace, persist the copy, and only
    /// then swap it in. A failed write leaves memory and file in agreement.
    fn commit<F>(&self, change: F) -> Result<(), DatastoreError>
    where
        F: FnOnce(&mut BTreeMap<Key, Bytes>) -> Result<(), DatastoreError>,
    {
        let _guard = self.write_lock.lock();
        let mut next = self.inner.snapshot();
        change(&mut next)?;
        self.save_to_file(&next)?;
        self.inner.restore(next);
        Ok(())
    }

    fn save_to_file(&self, entries: &BTreeMap<Key, Bytes>) -> Result<(), DatastoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut bytes = Vec::new();
        for (key, value) in entries {
            write_chunk(&mut bytes, key.as_bytes())?;
            write_chunk(&mut bytes, value)?;
        }

        // Write atomically via temp file
        let temp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn read_chunk<'a>(bytes: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let len_bytes: [u8; 4] = bytes.get(*cursor..*cursor + 4)?.try_into().ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let start = *cursor + 4;
    let chunk = bytes.get(start..start + len)?;
    *cursor = start + len;
    Some(chunk)
}

fn write_chunk(out: &mut Vec<u8>, chunk: &[u8]) -> Result<(), DatastoreError> {
    let len = u32::try_from(chunk.len()).map_err(DatastoreError::io)?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(chunk);
    Ok(())
}

impl Datastore for FileDatastore {
    fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        self.inner.get(key)
    }

    fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        self.inner.has(key)
    }

    fn put(&self, key: &Key, value: Bytes) -> Result<(), DatastoreError> {
        self.commit(|entries| {
            entries.insert(key.clone(), value);
            Ok(())
        })
    }

    fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        self.commit(|entries| {
            entries
                .remove(key)
                .map(|_| ())
                .ok_or(DatastoreError::NotFound)
        })
    }

    fn query(&self, query: &Query) -> Result<QueryResults, DatastoreError> {
        let results = scan(&self.inner.snapshot(), query);
        Ok(Box::new(results.into_iter().map(Ok)))
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), DatastoreError> {
        self.commit(|entries| {
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
        })
    }

    fn sync(&self) -> Result<(), DatastoreError> {
        let _guard = self.write_lock.lock();
        self.save_to_file(&self.inner.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_restores_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let ds = FileDatastore::open(&path).unwrap();
            ds.put(&Key::new("/blocks/A"), Bytes::from_static(b"alpha"))
                .unwrap();
            ds.put(&Key::new("/blocks/B"), Bytes::from_static(b"beta"))
                .unwrap();
            ds.delete(&Key::new("/blocks/B")).unwrap();
        }

        let ds = FileDatastore::open(&path).unwrap();
        assert_eq!(
            ds.get(&Key::new("/blocks/A")).unwrap(),
            Bytes::from_static(b"alpha")
        );
        assert!(!ds.has(&Key::new("/blocks/B")).unwrap());
    }

    #[test]
    fn test_truncated_snapshot_keeps_complete_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let ds = FileDatastore::open(&path).unwrap();
            ds.put(&Key::new("/k"), Bytes::from_static(b"v")).unwrap();
        }
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(&[9, 0, 0, 0, b'/']);
        std::fs::write(&path, raw).unwrap();

        let ds = FileDatastore::open(&path).unwrap();
        assert!(ds.has(&Key::new("/k")).unwrap());
        assert_eq!(ds.inner.len(), 1);
    }

    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let path = sub.join("store.db");
        let key = Key::new("/blocks/A");

        let ds = FileDatastore::open(&path).unwrap();
        // A plain file where the parent directory should be.
        std::fs::write(&sub, b"not a directory").unwrap();

        assert!(ds.put(&key, Bytes::from_static(b"alpha")).is_err());
        assert!(!ds.has(&key).unwrap());
        assert!(ds
            .atomic_batch_write(vec![BatchOperation::put(key.clone(), Bytes::from_static(b"alpha"))])
            .is_err());
        assert!(!ds.has(&key).unwrap());

        std::fs::remove_file(&sub).unwrap();
        ds.put(&key, Bytes::from_static(b"alpha")).unwrap();
        drop(ds);

        let reopened = FileDatastore::open(&path).unwrap();
        assert_eq!(reopened.get(&key).unwrap(), Bytes::from_static(b"alpha"));
    }

    #[test]
    fn test_delete_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ds = FileDatastore::open(dir.path().join("store.db")).unwrap();
        assert_eq!(ds.delete(&Key::new("/nope")), Err(DatastoreError::NotFound));
    }
}
