//! Peer request queue.
//!
//! Send tasks are keyed by `(peer, cid)`. Each peer keeps its own queue
//! ordered by descending priority; between peers the one with the fewest
//! blocks in flight goes first, ties broken by the age of its next task.
//! This serves every requesting peer in turn while honouring each peer's
//! own priorities.
//!
//! Removal is lazy: the task is marked trashed and skipped when popped.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use shared_types::{Cid, PeerId};

/// A task handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTask {
    pub peer: PeerId,
    pub cid: Cid,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy)]
struct TaskState {
    priority: i32,
    created: u64,
    trashed: bool,
}

type Order = (Reverse<i32>, u64);

#[derive(Debug, Default)]
struct Partner {
    queue: BTreeMap<Order, Cid>,
    /// Blocks popped and not yet reported done.
    active: HashSet<Cid>,
    /// Live (non-trashed) queued tasks.
    requests: usize,
}

impl Partner {
    fn next_created(&self) -> u64 {
        self.queue.keys().next().map_or(u64::MAX, |(_, created)| *created)
    }
}

#[derive(Debug, Default)]
pub struct PeerRequestQueue {
    tasks: HashMap<(PeerId, Cid), TaskState>,
    partners: HashMap<PeerId, Partner>,
    next_created: u64,
}

impl PeerRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `cid` for `peer`, or update the priority of a queued task.
    /// Blocks currently being sent to `peer` are not queued again.
    pub fn push(&mut self, peer: &PeerId, cid: Cid, priority: i32) {
        let partner = self.partners.entry(peer.clone()).or_default();
        if partner.active.contains(&cid) {
            return;
        }

        let key = (peer.clone(), cid);
        if let Some(task) = self.tasks.get_mut(&key) {
            if task.trashed {
                task.trashed = false;
                partner.requests += 1;
            }
            if task.priority != priority {
                partner.queue.remove(&(Reverse(task.priority), task.created));
                task.priority = priority;
                partner.queue.insert((Reverse(priority), task.created), cid);
            }
            return;
        }

        let created = self.next_created;
        self.next_created += 1;
        partner.queue.insert((Reverse(priority), created), cid);
        partner.requests += 1;
        self.tasks.insert(
            key,
            TaskState {
                priority,
                created,
                trashed: false,
            },
        );
    }

    /// Next task to perform, if any.
    pub fn pop(&mut self) -> Option<PeerTask> {
        loop {
            let peer = self
                .partners
                .iter()
                .filter(|(_, p)| p.requests > 0)
                .min_by_key(|(_, p)| (p.active.len(), p.next_created()))
                .map(|(peer, _)| peer.clone())?;

            let partner = self.partners.get_mut(&peer)?;
            while let Some(((Reverse(priority), _), cid)) = partner.queue.pop_first() {
                let Some(task) = self.tasks.remove(&(peer.clone(), cid)) else {
                    continue;
                };
                if task.trashed {
                    continue;
                }
                partner.requests -= 1;
                partner.active.insert(cid);
                return Some(PeerTask {
                    peer,
                    cid,
                    priority,
                });
            }
            // Only trash was left for this peer.
            partner.requests = 0;
        }
    }

    /// Lazily drop a queued task.
    pub fn remove(&mut self, peer: &PeerId, cid: &Cid) {
        let Some(task) = self.tasks.get_mut(&(peer.clone(), *cid)) else {
            return;
        };
        if task.trashed {
            return;
        }
        task.trashed = true;
        if let Some(partner) = self.partners.get_mut(peer) {
            partner.requests = partner.requests.saturating_sub(1);
        }
    }

    /// A popped task finished; `peer` may be sent `cid` again.
    pub fn task_done(&mut self, peer: &PeerId, cid: &Cid) {
        let Some(partner) = self.partners.get_mut(peer) else {
            return;
        };
        partner.active.remove(cid);
        if partner.active.is_empty() && partner.requests == 0 {
            let stale: Vec<Cid> = partner.queue.values().copied().collect();
            for cid in stale {
                self.tasks.remove(&(peer.clone(), cid));
            }
            self.partners.remove(peer);
        }
    }

    /// Forget every task for `peer`.
    pub fn remove_peer(&mut self, peer: &PeerId) {
        if let Some(partner) = self.partners.remove(peer) {
            for cid in partner.queue.values() {
                self.tasks.remove(&(peer.clone(), *cid));
            }
        }
    }

    /// Live queued tasks.
    pub fn len(&self) -> usize {
        self.partners.values().map(|p| p.requests).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_for(&self, peer: &PeerId) -> usize {
        self.partners.get(peer).map_or(0, |p| p.active.len())
    }
}
