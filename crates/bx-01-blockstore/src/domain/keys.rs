//! Block key layout: `/blocks/<BASE32(cid bytes)>`.

use shared_types::datastore::{cid_to_segment, segment_to_cid};
use shared_types::{Cid, DatastoreError, Key};

/// Namespace holding every block.
pub const BLOCK_PREFIX: &str = "/blocks";

pub fn block_prefix() -> Key {
    Key::new(BLOCK_PREFIX)
}

/// Datastore key for `cid`.
pub fn cid_to_key(cid: &Cid) -> Key {
    block_prefix().child(cid_to_segment(cid))
}

/// CID stored under a block key.
pub fn key_to_cid(key: &Key) -> Result<Cid, DatastoreError> {
    segment_to_cid(key.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::test_utils::raw_block;

    #[test]
    fn test_block_key_round_trip() {
        let block = raw_block("key layout");
        let key = cid_to_key(block.cid());
        assert!(key.as_str().starts_with("/blocks/"));
        assert_eq!(key.parent(), block_prefix());
        assert_eq!(key_to_cid(&key).unwrap(), *block.cid());
    }
}
