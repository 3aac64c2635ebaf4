//! References from blocks to the file bytes they were read from.
//!
//! Stored under `/filestore/<BASE32(cid)>` as a bincode record.

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shared_types::datastore::cid_to_segment;
use shared_types::{Cid, Key};

use super::errors::BlockServiceError;

pub const FILESTORE_PREFIX: &str = "/filestore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilestoreRef {
    pub path: PathBuf,
    pub offset: u64,
    pub size: u64,
}

impl FilestoreRef {
    pub fn encode(&self) -> Result<Bytes, BlockServiceError> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| BlockServiceError::CorruptReference(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BlockServiceError> {
        bincode::deserialize(bytes).map_err(|e| BlockServiceError::CorruptReference(e.to_string()))
    }
}

pub fn filestore_key(cid: &Cid) -> Key {
    Key::new(FILESTORE_PREFIX).child(cid_to_segment(cid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::test_utils::raw_block;

    #[test]
    fn test_key_layout() {
        let cid = *raw_block("x").cid();
        let key = filestore_key(&cid);
        assert!(key.as_str().starts_with("/filestore/"));
        assert_eq!(key.name(), cid_to_segment(&cid));
    }

    #[test]
    fn test_reference_survives_encoding() {
        let reference = FilestoreRef {
            path: PathBuf::from("/data/movie.mkv"),
            offset: 262_144,
            size: 1024,
        };
        let bytes = reference.encode().unwrap();
        assert_eq!(FilestoreRef::decode(&bytes).unwrap(), reference);
        assert!(FilestoreRef::decode(&[0xFF]).is_err());
    }
}
