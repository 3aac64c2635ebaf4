//! Provider record layout.
//!
//! ```text
//! /providers/<BASE32(cid)>/<BASE32(peer)>  ->  zigzag varint(unix nanos)
//! ```

use bytes::{Bytes, BytesMut};
use prost::encoding::{decode_varint, encode_varint};
use shared_types::datastore::{cid_to_segment, decode_b32, encode_b32, segment_to_cid};
use shared_types::{Cid, Key, PeerId};

use super::errors::ProviderError;

pub const PROVIDERS_PREFIX: &str = "/providers";

pub fn providers_prefix() -> Key {
    Key::new(PROVIDERS_PREFIX)
}

/// Prefix holding every provider of `cid`.
pub fn cid_prefix(cid: &Cid) -> Key {
    providers_prefix().child(cid_to_segment(cid))
}

pub fn provider_key(cid: &Cid, peer: &PeerId) -> Key {
    cid_prefix(cid).child(encode_b32(peer.as_bytes()))
}

/// Split a provider key into its CID and peer.
pub fn parse_provider_key(key: &Key) -> Result<(Cid, PeerId), ProviderError> {
    let parts = key.namespaces();
    let [_, cid, peer] = parts.as_slice() else {
        return Err(ProviderError::BadRecord(format!(
            "unexpected key shape {}",
            key.as_str()
        )));
    };
    let cid = segment_to_cid(cid).map_err(|e| ProviderError::BadRecord(e.to_string()))?;
    let peer = decode_b32(peer).map_err(|e| ProviderError::BadRecord(e.to_string()))?;
    Ok((cid, PeerId::from_bytes(&peer)))
}

pub fn encode_time(unix_nanos: i64) -> Bytes {
    let zigzag = ((unix_nanos << 1) ^ (unix_nanos >> 63)) as u64;
    let mut buf = BytesMut::with_capacity(10);
    encode_varint(zigzag, &mut buf);
    buf.freeze()
}

pub fn decode_time(mut bytes: &[u8]) -> Result<i64, ProviderError> {
    let zigzag = decode_varint(&mut bytes).map_err(|e| ProviderError::BadRecord(e.to_string()))?;
    Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::test_utils::raw_block;

    #[test]
    fn test_key_layout() {
        let cid = *raw_block("provided").cid();
        let peer = PeerId::from_bytes(b"peer-a");

        let key = provider_key(&cid, &peer);

        assert!(key.as_str().starts_with("/providers/"));
        assert_eq!(key.parent(), cid_prefix(&cid));
        assert_eq!(parse_provider_key(&key).unwrap(), (cid, peer));
    }

    #[test]
    fn test_time_encoding() {
        for t in [0i64, 1, -1, 1_700_000_000_000_000_000, i64::MIN, i64::MAX] {
            assert_eq!(decode_time(&encode_time(t)).unwrap(), t);
        }
        // Zigzag keeps small magnitudes short.
        assert_eq!(encode_time(-1).as_ref(), &[0x01]);
        assert_eq!(encode_time(1).as_ref(), &[0x02]);
    }

    #[test]
    fn test_malformed_key_rejected() {
        assert!(parse_provider_key(&Key::new("/providers/only-one")).is_err());
    }
}
