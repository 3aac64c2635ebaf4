//! Pin modes, query results and the persisted pin snapshot.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use shared_types::{Cid, Key};
use tracing::warn;

use super::errors::PinError;

/// Datastore key holding the pin snapshot.
pub const PIN_DATASTORE_KEY: &str = "/local/pins";

pub fn pin_key() -> Key {
    Key::new(PIN_DATASTORE_KEY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinMode {
    /// The root and every descendant are kept.
    Recursive,
    /// Only the block itself is kept.
    Direct,
    /// Kept because a recursive pin reaches it.
    Indirect,
    /// Pins used by the node for its own bookkeeping.
    Internal,
    NotPinned,
    /// Query wildcard.
    Any,
}

impl PinMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinMode::Recursive => "recursive",
            PinMode::Direct => "direct",
            PinMode::Indirect => "indirect",
            PinMode::Internal => "internal",
            PinMode::NotPinned => "not pinned",
            PinMode::Any => "any",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "recursive" => PinMode::Recursive,
            "direct" => PinMode::Direct,
            "indirect" => PinMode::Indirect,
            "internal" => PinMode::Internal,
            "not pinned" => PinMode::NotPinned,
            "any" | "all" => PinMode::Any,
            _ => return None,
        })
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pin status of one CID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pinned {
    pub cid: Cid,
    pub mode: PinMode,
    /// Recursive root through which an indirect pin holds.
    pub via: Option<Cid>,
}

impl Pinned {
    pub fn not_pinned(cid: Cid) -> Self {
        Self {
            cid,
            mode: PinMode::NotPinned,
            via: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.mode != PinMode::NotPinned
    }
}

impl fmt::Display for Pinned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mode, &self.via) {
            (PinMode::NotPinned, _) => f.write_str("not pinned"),
            (PinMode::Indirect, Some(via)) => write!(f, "pinned via {via}"),
            (mode, _) => write!(f, "pinned: {mode}"),
        }
    }
}

/// In-memory pin sets. Names are kept per pin; empty when unnamed.
#[derive(Debug, Clone, Default)]
pub struct PinSets {
    pub direct: HashMap<Cid, String>,
    pub recursive: HashMap<Cid, String>,
    pub internal: HashSet<Cid>,
}

#[derive(Serialize, Deserialize)]
struct PinRecord {
    cid: Vec<u8>,
    mode: PinMode,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct PinSnapshot {
    version: u32,
    records: Vec<PinRecord>,
}

const SNAPSHOT_VERSION: u32 = 1;

impl PinSets {
    pub fn len(&self) -> usize {
        self.direct.len() + self.recursive.len() + self.internal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self) -> Result<Vec<u8>, PinError> {
        let records = self
            .recursive
            .iter()
            .map(|(cid, name)| (cid, PinMode::Recursive, name.clone()))
            .chain(
                self.direct
                    .iter()
                    .map(|(cid, name)| (cid, PinMode::Direct, name.clone())),
            )
            .chain(
                self.internal
                    .iter()
                    .map(|cid| (cid, PinMode::Internal, String::new())),
            )
            .map(|(cid, mode, name)| PinRecord {
                cid: cid.to_bytes(),
                mode,
                name,
            })
            .collect();

        bincode::serialize(&PinSnapshot {
            version: SNAPSHOT_VERSION,
            records,
        })
        .map_err(|e| PinError::Corrupt(e.to_string()))
    }

    /// Decode a snapshot. Records with an unreadable CID are skipped; a
    /// snapshot that does not decode at all is an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, PinError> {
        let snapshot: PinSnapshot =
            bincode::deserialize(bytes).map_err(|e| PinError::Corrupt(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PinError::Corrupt(format!(
                "unknown pin snapshot version {}",
                snapshot.version
            )));
        }

        let mut sets = PinSets::default();
        for record in snapshot.records {
            let cid = match Cid::try_from(record.cid.as_slice()) {
                Ok(cid) => cid,
                Err(e) => {
                    warn!(error = %e, mode = %record.mode, "[pinning] skipping corrupt pin record");
                    continue;
                }
            };
            match record.mode {
                PinMode::Recursive => {
                    sets.recursive.insert(cid, record.name);
                }
                PinMode::Direct => {
                    sets.direct.insert(cid, record.name);
                }
                PinMode::Internal => {
                    sets.internal.insert(cid);
                }
                other => {
                    warn!(cid = %cid, mode = %other, "[pinning] skipping pin record with transient mode");
                }
            }
        }
        Ok(sets)
    }
}
