//! BitSwap wire message.
//!
//! ```text
//! message Message {
//!   message Wantlist {
//!     message Entry {
//!       optional bytes block = 1;      // cid bytes
//!       optional int32 priority = 2;
//!       optional bool cancel = 3;
//!     }
//!     repeated Entry entries = 1;
//!     optional bool full = 2;
//!   }
//!   message Block {
//!     optional bytes prefix = 1;       // cid version, codec, hash code, hash length
//!     optional bytes data = 2;
//!   }
//!   optional Wantlist wantlist = 1;
//!   repeated bytes blocks = 2;         // 1.0.0 only
//!   repeated Block payload = 3;        // 1.1.0
//! }
//! ```
//!
//! Frames are varint length-delimited. Blocks are rebuilt from their data on
//! decode, so a decoded block always matches its CID.

use std::collections::{HashMap, HashSet};
use std::fmt;

use bytes::Bytes;
use prost::encoding::{decode_varint, encode_varint};
use prost::Message as _;
use shared_types::{digest, Block, Cid, DAG_PB, SHA2_256};
use tracing::warn;

use super::errors::MessageError;

// =============================================================================
// PROTOBUF SCHEMA
// =============================================================================

#[derive(Clone, PartialEq, prost::Message)]
pub struct PbMessage {
    #[prost(message, optional, tag = "1")]
    pub wantlist: Option<PbWantlist>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub blocks: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "3")]
    pub payload: Vec<PbBlock>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PbWantlist {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<PbEntry>,
    #[prost(bool, optional, tag = "2")]
    pub full: Option<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PbEntry {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub block: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "2")]
    pub priority: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub cancel: Option<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PbBlock {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub prefix: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub data: Option<Vec<u8>>,
}

// =============================================================================
// PROTOCOL VERSIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// Blocks travel as bare data and are addressed as CIDv0.
    V100,
    /// Blocks carry their CID prefix.
    #[default]
    V110,
}

impl ProtocolVersion {
    pub fn protocol_id(&self) -> &'static str {
        match self {
            ProtocolVersion::V100 => "/ipfs/bitswap/1.0.0",
            ProtocolVersion::V110 => "/ipfs/bitswap/1.1.0",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol_id())
    }
}

// =============================================================================
// DOMAIN MESSAGE
// =============================================================================

/// One wantlist change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub cid: Cid,
    pub priority: i32,
    pub cancel: bool,
}

/// A wantlist delta (or full wantlist) plus blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BitswapMessage {
    full: bool,
    entries: Vec<Entry>,
    entry_index: HashMap<Cid, usize>,
    blocks: Vec<Block>,
    block_index: HashSet<Cid>,
}

impl BitswapMessage {
    /// A full message replaces the recipient's view of our wants.
    pub fn new(full: bool) -> Self {
        Self {
            full,
            ..Default::default()
        }
    }

    pub fn full(&self) -> bool {
        self.full
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.blocks.is_empty()
    }

    /// Entries in insertion order.
    pub fn wantlist(&self) -> &[Entry] {
        &self.entries
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Total payload size of the carried blocks.
    pub fn block_bytes(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    pub fn add_entry(&mut self, cid: Cid, priority: i32) {
        self.upsert(cid, priority, false);
    }

    pub fn cancel(&mut self, cid: Cid) {
        self.upsert(cid, 0, true);
    }

    fn upsert(&mut self, cid: Cid, priority: i32, cancel: bool) {
        match self.entry_index.get(&cid) {
            Some(&i) => {
                self.entries[i].priority = priority;
                self.entries[i].cancel = cancel;
            }
            None => {
                self.entry_index.insert(cid, self.entries.len());
                self.entries.push(Entry {
                    cid,
                    priority,
                    cancel,
                });
            }
        }
    }

    /// Add a block; a second block with the same CID is ignored.
    pub fn add_block(&mut self, block: Block) {
        if self.block_index.insert(*block.cid()) {
            self.blocks.push(block);
        }
    }

    // =========================================================================
    // ENCODING
    // =========================================================================

    pub fn to_proto(&self, version: ProtocolVersion) -> PbMessage {
        let wantlist = PbWantlist {
            entries: self
                .entries
                .iter()
                .map(|e| PbEntry {
                    block: Some(e.cid.to_bytes()),
                    priority: Some(e.priority),
                    cancel: Some(e.cancel),
                })
                .collect(),
            full: Some(self.full),
        };
        let mut pb = PbMessage {
            wantlist: Some(wantlist),
            ..Default::default()
        };
        match version {
            ProtocolVersion::V100 => {
                pb.blocks = self.blocks.iter().map(|b| b.data().to_vec()).collect();
            }
            ProtocolVersion::V110 => {
                pb.payload = self
                    .blocks
                    .iter()
                    .map(|b| PbBlock {
                        prefix: Some(prefix_bytes(b.cid())),
                        data: Some(b.data().to_vec()),
                    })
                    .collect();
            }
        }
        pb
    }

    /// Varint length-delimited frame.
    pub fn to_bytes(&self, version: ProtocolVersion) -> Bytes {
        Bytes::from(self.to_proto(version).encode_length_delimited_to_vec())
    }

    /// Decode one length-delimited frame. Blocks whose hash cannot be
    /// recomputed are dropped.
    pub fn from_bytes(frame: &[u8]) -> Result<Self, MessageError> {
        let pb = PbMessage::decode_length_delimited(frame)?;
        Self::from_proto(pb)
    }

    pub fn from_proto(pb: PbMessage) -> Result<Self, MessageError> {
        let wantlist = pb.wantlist.unwrap_or_default();
        let mut msg = BitswapMessage::new(wantlist.full.unwrap_or(false));

        for entry in wantlist.entries {
            let raw = entry.block.unwrap_or_default();
            let cid = Cid::try_from(raw.as_slice())
                .map_err(|e| MessageError::InvalidCid(e.to_string()))?;
            msg.upsert(
                cid,
                entry.priority.unwrap_or(0),
                entry.cancel.unwrap_or(false),
            );
        }

        for data in pb.blocks {
            match digest(SHA2_256, &data).and_then(|mh| {
                Cid::new_v0(mh).map_err(|e| shared_types::BlockError::InvalidCid(e.to_string()))
            }) {
                Ok(cid) => msg.add_block(Block::with_cid(cid, data)),
                Err(e) => warn!(error = %e, "[bitswap] dropping undecodable block"),
            }
        }

        for block in pb.payload {
            let prefix = block.prefix.unwrap_or_default();
            let (version, codec, code, len) = parse_prefix(&prefix)?;
            let data = block.data.unwrap_or_default();
            match cid_for(version, codec, code, len, &data) {
                Ok(cid) => msg.add_block(Block::with_cid(cid, data)),
                Err(reason) => {
                    warn!(codec, hash = code, %reason, "[bitswap] dropping unverifiable block");
                }
            }
        }

        Ok(msg)
    }
}

fn prefix_bytes(cid: &Cid) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    encode_varint(u64::from(cid.version()), &mut buf);
    encode_varint(cid.codec(), &mut buf);
    encode_varint(cid.hash().code(), &mut buf);
    encode_varint(u64::from(cid.hash().size()), &mut buf);
    buf
}

fn parse_prefix(mut prefix: &[u8]) -> Result<(u64, u64, u64, u64), MessageError> {
    let mut next = |field: &str| {
        decode_varint(&mut prefix)
            .map_err(|e| MessageError::InvalidPrefix(format!("{field}: {e}")))
    };
    Ok((next("version")?, next("codec")?, next("hash")?, next("length")?))
}

fn cid_for(version: u64, codec: u64, code: u64, len: u64, data: &[u8]) -> Result<Cid, String> {
    let mh = digest(code, data).map_err(|e| e.to_string())?;
    if u64::from(mh.size()) != len {
        return Err(format!("truncated digests are not supported ({len} bytes)"));
    }
    match version {
        0 if codec == DAG_PB => Cid::new_v0(mh).map_err(|e| e.to_string()),
        1 => Ok(Cid::new_v1(codec, mh)),
        other => Err(format!("unsupported cid version {other} for codec 0x{codec:x}")),
    }
}
