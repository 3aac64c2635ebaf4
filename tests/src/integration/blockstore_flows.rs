//! # Blockstore Flows
//!
//! Datastore → blockstore → cache stack, exercised end to end:
//!
//! 1. **Round-trip**: a raw block written and read back byte for byte
//! 2. **Tamper detection**: bytes changed behind the blockstore's back are
//!    caught when hash-on-read is enabled
//! 3. **Bloom filter**: absent CIDs are answered without touching the
//!    datastore
//! 4. **Durability**: a put that failed to reach disk is retried for real

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bx_01_blockstore::{
        cached_blockstore, cid_to_key, BaseBlockstore, Blockstore, BlockstoreError, CacheOpts,
    };
    use bytes::Bytes;
    use shared_types::test_utils::{random_blocks, raw_block};
    use shared_types::{Block, Datastore, FileDatastore};
    use tokio_util::sync::CancellationToken;

    use crate::fixtures::{counting_blockstore, memory_blockstore};

    #[test]
    fn test_round_trip_beep_boop() {
        let blockstore = memory_blockstore();
        let block = raw_block("beep boop");

        blockstore.put(block.clone()).unwrap();

        let fetched = blockstore.get(block.cid()).unwrap();
        assert_eq!(fetched.data().as_ref(), b"beep boop");
        assert!(blockstore.has(block.cid()).unwrap());
        assert_eq!(blockstore.get_size(block.cid()).unwrap(), 9);
    }

    #[test]
    fn test_delete_then_absent() {
        let blockstore = memory_blockstore();
        let block = raw_block("short lived");
        blockstore.put(block.clone()).unwrap();
        blockstore.delete(block.cid()).unwrap();

        assert!(!blockstore.has(block.cid()).unwrap());
        assert_eq!(blockstore.get(block.cid()), Err(BlockstoreError::NotFound));
    }

    #[test]
    fn test_same_block_written_once() {
        let (datastore, blockstore) = counting_blockstore();
        let block = raw_block("twice");

        blockstore.put(block.clone()).unwrap();
        blockstore.put(block.clone()).unwrap();
        blockstore.put_many(vec![block]).unwrap();

        assert_eq!(datastore.puts(), 1);
    }

    #[test]
    fn test_all_keys_lists_each_block_once() {
        let blockstore = memory_blockstore();
        let blocks = random_blocks(50, 32);
        blockstore.put_many(blocks.clone()).unwrap();
        blockstore.put_many(blocks[..10].to_vec()).unwrap();

        let keys: Vec<_> = blockstore.all_keys(&CancellationToken::new()).unwrap().collect();
        let unique: HashSet<_> = keys.iter().copied().collect();
        assert_eq!(keys.len(), 50);
        assert_eq!(unique, blocks.iter().map(|b| *b.cid()).collect());
    }

    #[test]
    fn test_hash_on_read_detects_tampering() {
        let (datastore, blockstore) = counting_blockstore();
        let block = raw_block("original bytes");
        blockstore.put(block.clone()).unwrap();

        // Overwrite the stored value directly.
        datastore
            .put(&cid_to_key(block.cid()), Bytes::from_static(b"tampered bytes"))
            .unwrap();

        let unchecked = blockstore.get(block.cid()).unwrap();
        assert_eq!(unchecked.data().as_ref(), b"tampered bytes");

        blockstore.hash_on_read(true);
        assert_eq!(
            blockstore.get(block.cid()),
            Err(BlockstoreError::HashMismatch { cid: *block.cid() })
        );
    }

    #[tokio::test]
    async fn test_bloom_filter_short_circuits_absent_cids() {
        let (datastore, base) = counting_blockstore();
        let present = random_blocks(1000, 64);
        base.put_many(present.clone()).unwrap();

        let cache = cached_blockstore(base, &CacheOpts::default(), CancellationToken::new()).unwrap();
        cache.wait_ready().await;

        // Every stored CID must be reported present.
        for block in &present {
            assert!(cache.has(block.cid()).unwrap());
        }

        let absent: Vec<Block> = random_blocks(1000, 64);
        datastore.reset();
        for block in &absent {
            assert!(!cache.has(block.cid()).unwrap());
        }
        let probes = datastore.has_calls();
        assert!(
            probes <= 50,
            "{probes} of 1000 absent lookups reached the datastore"
        );
    }

    #[test]
    fn test_put_retried_after_failed_save_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("repo");
        let path = sub.join("blocks.db");
        let block = raw_block("must reach disk");

        let blockstore = BaseBlockstore::new(FileDatastore::open(&path).unwrap());
        std::fs::write(&sub, b"in the way").unwrap();
        assert!(blockstore.put(block.clone()).is_err());
        assert!(!blockstore.has(block.cid()).unwrap());

        std::fs::remove_file(&sub).unwrap();
        blockstore.put(block.clone()).unwrap();
        drop(blockstore);

        let reopened = BaseBlockstore::new(FileDatastore::open(&path).unwrap());
        assert_eq!(reopened.get(block.cid()).unwrap(), block);
    }
}
