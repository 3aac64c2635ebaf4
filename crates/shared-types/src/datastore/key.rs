//! Hierarchical datastore keys (`/a/b/c`).

use std::fmt;

use cid::Cid;
use data_encoding::BASE32_NOPAD;

use crate::errors::DatastoreError;

/// A cleaned, slash separated datastore path.
///
/// Keys always start with `/` and never end with one (except the root).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Clean `raw` into a key: leading slash, no empty segments.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let segments: Vec<&str> = raw.as_ref().split('/').filter(|s| !s.is_empty()).collect();
        Self::from_segments(&segments)
    }

    pub fn root() -> Self {
        Key("/".to_string())
    }

    fn from_segments(segments: &[&str]) -> Self {
        if segments.is_empty() {
            return Self::root();
        }
        let mut out = String::new();
        for segment in segments {
            out.push('/');
            out.push_str(segment);
        }
        Key(out)
    }

    /// Append one or more path segments.
    #[must_use]
    pub fn child(&self, name: impl AsRef<str>) -> Self {
        Key::new(format!("{}/{}", self.0, name.as_ref()))
    }

    /// Everything but the last segment.
    pub fn parent(&self) -> Self {
        let namespaces = self.namespaces();
        if namespaces.len() <= 1 {
            return Self::root();
        }
        Self::from_segments(&namespaces[..namespaces.len() - 1])
    }

    /// Last segment, or `""` for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// True when `other` lives strictly below this key.
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Parse raw key bytes read back from a byte-keyed store.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatastoreError> {
        let s = std::str::from_utf8(bytes).map_err(|_| DatastoreError::InvalidKey {
            key: hex::encode(bytes),
        })?;
        Ok(Key::new(s))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Key::new(raw)
    }
}

/// Uppercase RFC 4648 base32 without padding.
pub fn encode_b32(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes)
}

pub fn decode_b32(segment: &str) -> Result<Vec<u8>, DatastoreError> {
    BASE32_NOPAD
        .decode(segment.as_bytes())
        .map_err(|e| DatastoreError::InvalidKey {
            key: format!("{segment}: {e}"),
        })
}

/// Key segment for a CID: base32 of its binary form.
pub fn cid_to_segment(cid: &Cid) -> String {
    encode_b32(&cid.to_bytes())
}

pub fn segment_to_cid(segment: &str) -> Result<Cid, DatastoreError> {
    let bytes = decode_b32(segment)?;
    Cid::try_from(bytes.as_slice()).map_err(|e| DatastoreError::InvalidKey {
        key: format!("{segment}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Block;

    #[test]
    fn test_key_cleaning() {
        assert_eq!(Key::new("blocks//abc/").as_str(), "/blocks/abc");
        assert_eq!(Key::new("").as_str(), "/");
        assert_eq!(Key::new("/a/b").child("c").as_str(), "/a/b/c");
    }

    #[test]
    fn test_parent_and_name() {
        let key = Key::new("/providers/CID/PEER");
        assert_eq!(key.name(), "PEER");
        assert_eq!(key.parent().as_str(), "/providers/CID");
        assert_eq!(Key::new("/a").parent(), Key::root());
    }

    #[test]
    fn test_ancestry_respects_segment_boundaries() {
        let prefix = Key::new("/providers/AB");
        assert!(prefix.is_ancestor_of(&Key::new("/providers/AB/X")));
        assert!(!prefix.is_ancestor_of(&Key::new("/providers/ABC/X")));
        assert!(!prefix.is_ancestor_of(&prefix));
        assert!(Key::root().is_ancestor_of(&prefix));
    }

    #[test]
    fn test_cid_segment_round_trip() {
        let block = Block::new(&b"segment"[..]).unwrap();
        let segment = cid_to_segment(block.cid());
        assert!(!segment.contains('='));
        assert_eq!(segment, segment.to_uppercase());
        assert_eq!(segment_to_cid(&segment).unwrap(), *block.cid());
    }

    #[test]
    fn test_bad_segment_is_invalid_key() {
        assert!(matches!(
            segment_to_cid("not base32!"),
            Err(DatastoreError::InvalidKey { .. })
        ));
    }
}
