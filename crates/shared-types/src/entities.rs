//! # Core Domain Entities
//!
//! Content identifiers, blocks and peer identities.
//!
//! ## Clusters
//!
//! - **Content**: `Block`, `BlockKind`, codec and hash-function constants
//! - **Networking**: `PeerId`, `PeerInfo`

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256, Sha512};

use crate::errors::BlockError;

pub use cid::Cid;

/// Multihash type carried by every [`Cid`].
pub type Multihash = multihash::Multihash<64>;

// =============================================================================
// CLUSTER A: CONTENT
// =============================================================================

/// Multicodec for raw binary leaves.
pub const RAW: u64 = 0x55;

/// Multicodec for protobuf DAG nodes.
pub const DAG_PB: u64 = 0x70;

/// Identity multihash (digest is the data itself).
pub const IDENTITY: u64 = 0x00;

/// sha2-256 multihash code.
pub const SHA2_256: u64 = 0x12;

/// sha2-512 multihash code.
pub const SHA2_512: u64 = 0x13;

/// Largest payload accepted by the identity hash.
pub const MAX_IDENTITY_DIGEST: usize = 64;

/// Hash `data` with the multihash function `code`.
pub fn digest(code: u64, data: &[u8]) -> Result<Multihash, BlockError> {
    let wrapped = match code {
        SHA2_256 => Multihash::wrap(code, &Sha256::digest(data)),
        SHA2_512 => Multihash::wrap(code, &Sha512::digest(data)),
        IDENTITY => {
            if data.len() > MAX_IDENTITY_DIGEST {
                return Err(BlockError::DigestTooLong { len: data.len() });
            }
            Multihash::wrap(code, data)
        }
        other => return Err(BlockError::UnsupportedHash { code: other }),
    };
    wrapped.map_err(|e| BlockError::InvalidCid(e.to_string()))
}

/// CIDv1 over `data` using `codec` and sha2-256.
pub fn cid_v1(codec: u64, data: &[u8]) -> Result<Cid, BlockError> {
    Ok(Cid::new_v1(codec, digest(SHA2_256, data)?))
}

/// A CID whose multihash carries no digest bytes.
///
/// Such keys are never looked up in a datastore.
pub fn is_empty_cid(cid: &Cid) -> bool {
    cid.hash().size() == 0
}

/// How a block's bytes should be interpreted and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BlockKind {
    /// Opaque bytes with no links.
    #[default]
    Raw,
    /// A DAG-PB node that may link to other blocks.
    Protobuf,
    /// Bytes that also live at `offset` inside a file on disk.
    Filestore {
        /// File the bytes were read from.
        path: PathBuf,
        /// Byte offset within the file.
        offset: u64,
    },
}

impl BlockKind {
    /// Kind implied by a CID codec.
    pub fn for_codec(codec: u64) -> Self {
        match codec {
            DAG_PB => BlockKind::Protobuf,
            _ => BlockKind::Raw,
        }
    }
}

/// An immutable `(cid, bytes)` pair.
///
/// Equality compares the CID and the bytes; the [`BlockKind`] is a storage
/// hint only.
#[derive(Clone)]
pub struct Block {
    cid: Cid,
    data: Bytes,
    kind: BlockKind,
}

impl Block {
    /// Raw block addressed by the sha2-256 of `data`.
    pub fn new(data: impl Into<Bytes>) -> Result<Self, BlockError> {
        let data = data.into();
        let cid = cid_v1(RAW, &data)?;
        Ok(Self {
            cid,
            data,
            kind: BlockKind::Raw,
        })
    }

    /// DAG-PB block addressed by the sha2-256 of `data`.
    pub fn new_protobuf(data: impl Into<Bytes>) -> Result<Self, BlockError> {
        let data = data.into();
        let cid = cid_v1(DAG_PB, &data)?;
        Ok(Self {
            cid,
            data,
            kind: BlockKind::Protobuf,
        })
    }

    /// Pair `data` with a caller supplied CID without hashing.
    pub fn with_cid(cid: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            kind: BlockKind::for_codec(cid.codec()),
            cid,
            data: data.into(),
        }
    }

    /// Pair `data` with `cid`, failing if the digest does not match.
    pub fn verified(cid: Cid, data: impl Into<Bytes>) -> Result<Self, BlockError> {
        let block = Self::with_cid(cid, data);
        block.verify()?;
        Ok(block)
    }

    /// Override the storage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: BlockKind) -> Self {
        self.kind = kind;
        self
    }

    /// Recompute the digest and compare it with the CID.
    pub fn verify(&self) -> Result<(), BlockError> {
        let expected = self.cid.hash();
        let actual = digest(expected.code(), &self.data)?;
        if actual.digest() != expected.digest() {
            return Err(BlockError::HashMismatch { cid: self.cid });
        }
        Ok(())
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the block, returning its bytes.
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.cid == other.cid && self.data == other.data
    }
}

impl Eq for Block {}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("cid", &self.cid.to_string())
            .field("len", &self.data.len())
            .field("kind", &self.kind)
            .finish()
    }
}

// =============================================================================
// CLUSTER B: NETWORKING
// =============================================================================

/// Opaque identity of a remote peer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<[u8]>);

impl PeerId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }

    /// A fresh 32-byte random identity.
    pub fn random() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.0[..self.0.len().min(6)];
        write!(f, "{}", hex::encode(short))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0))
    }
}

/// A peer and the addresses it can be dialed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addrs: Vec<String>,
}

impl PeerInfo {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
        }
    }
}
