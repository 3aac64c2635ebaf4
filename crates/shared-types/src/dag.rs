//! # DAG Links
//!
//! Decoding of DAG-PB nodes and the [`LinkSource`] port used by pinning,
//! garbage collection and the reprovider to walk a DAG.

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use prost::Message;

use crate::entities::{Block, BlockKind, DAG_PB, RAW};
use crate::errors::{BlockError, DagError};

/// A DAG-PB link.
#[derive(Clone, PartialEq, Message)]
pub struct PbLink {
    /// Binary CID of the target.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub hash: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    /// Cumulative size of the target DAG.
    #[prost(uint64, optional, tag = "3")]
    pub tsize: Option<u64>,
}

/// A DAG-PB node: opaque data plus ordered links.
#[derive(Clone, PartialEq, Message)]
pub struct PbNode {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub data: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "2")]
    pub links: Vec<PbLink>,
}

impl PbNode {
    /// Node with `data` linking to `children` in order.
    pub fn new(data: impl Into<Vec<u8>>, children: &[Cid]) -> Self {
        Self {
            data: Some(data.into()),
            links: children
                .iter()
                .map(|cid| PbLink {
                    hash: Some(cid.to_bytes()),
                    name: None,
                    tsize: None,
                })
                .collect(),
        }
    }

    /// Encode this node into a DAG-PB block.
    pub fn into_block(self) -> Result<Block, BlockError> {
        Block::new_protobuf(Bytes::from(self.encode_to_vec()))
    }
}

/// Child CIDs of `block`, in link order.
///
/// Raw blocks have no links. DAG-PB nodes are decoded. Any other codec is
/// [`DagError::UnsupportedCodec`], so a walker never silently skips children.
pub fn links(block: &Block) -> Result<Vec<Cid>, DagError> {
    let cid = *block.cid();
    match cid.codec() {
        RAW => Ok(Vec::new()),
        DAG_PB => {
            let node = PbNode::decode(block.data().as_ref()).map_err(|e| DagError::Decode {
                cid,
                message: e.to_string(),
            })?;
            node.links
                .iter()
                .map(|link| {
                    let hash = link.hash.as_deref().unwrap_or_default();
                    Cid::try_from(hash).map_err(|e| DagError::Decode {
                        cid,
                        message: format!("bad link: {e}"),
                    })
                })
                .collect()
        }
        codec => match block.kind() {
            BlockKind::Filestore { .. } => Ok(Vec::new()),
            _ => Err(DagError::UnsupportedCodec { cid, codec }),
        },
    }
}

/// Resolves a CID to the CIDs it links to.
#[async_trait]
pub trait LinkSource: Send + Sync {
    async fn get_links(&self, cid: &Cid) -> Result<Vec<Cid>, DagError>;
}
