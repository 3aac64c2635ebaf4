//! Local wantlist.
//!
//! Each entry remembers which requests (sessions) want it. The entry is
//! broadcast while at least one of them still does.

use std::collections::{HashMap, HashSet};

use shared_types::Cid;

/// Requester id used by callers that are not part of a session.
pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantEntry {
    pub cid: Cid,
    pub priority: i32,
    sessions: HashSet<SessionId>,
}

impl WantEntry {
    pub fn sessions(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.iter()
    }

    pub fn ref_count(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Wantlist {
    entries: HashMap<Cid, WantEntry>,
}

impl Wantlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `session` wants `cid`. Returns `true` if the CID was not
    /// wanted before.
    pub fn add(&mut self, cid: Cid, priority: i32, session: SessionId) -> bool {
        match self.entries.get_mut(&cid) {
            Some(entry) => {
                entry.priority = priority;
                entry.sessions.insert(session);
                false
            }
            None => {
                self.entries.insert(
                    cid,
                    WantEntry {
                        cid,
                        priority,
                        sessions: HashSet::from([session]),
                    },
                );
                true
            }
        }
    }

    /// Drop `session`'s interest. Returns `true` if nobody wants `cid` any
    /// more and the entry was removed.
    pub fn remove(&mut self, cid: &Cid, session: SessionId) -> bool {
        let Some(entry) = self.entries.get_mut(cid) else {
            return false;
        };
        if !entry.sessions.remove(&session) {
            return false;
        }
        if entry.sessions.is_empty() {
            self.entries.remove(cid);
            return true;
        }
        false
    }

    /// Remove `cid` regardless of who wants it.
    pub fn remove_all(&mut self, cid: &Cid) -> bool {
        self.entries.remove(cid).is_some()
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.entries.contains_key(cid)
    }

    pub fn get(&self, cid: &Cid) -> Option<&WantEntry> {
        self.entries.get(cid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries by descending priority.
    pub fn sorted_entries(&self) -> Vec<WantEntry> {
        let mut out: Vec<WantEntry> = self.entries.values().cloned().collect();
        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.cid.to_bytes().cmp(&b.cid.to_bytes()))
        });
        out
    }
}
