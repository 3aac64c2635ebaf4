//! # Block Filters
//!
//! The set of CIDs a subscription is still waiting for.

use std::collections::HashSet;

use shared_types::{Block, Cid};

/// CIDs a subscriber wants, each delivered at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFilter {
    wanted: HashSet<Cid>,
}

impl BlockFilter {
    pub fn new(cids: impl IntoIterator<Item = Cid>) -> Self {
        Self {
            wanted: cids.into_iter().collect(),
        }
    }

    /// Whether `block` is still awaited.
    pub fn matches(&self, block: &Block) -> bool {
        self.wanted.contains(block.cid())
    }

    /// Mark `cid` delivered. Returns false if it was not awaited.
    pub fn take(&mut self, cid: &Cid) -> bool {
        self.wanted.remove(cid)
    }

    pub fn is_complete(&self) -> bool {
        self.wanted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.wanted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cid> {
        self.wanted.iter()
    }
}
