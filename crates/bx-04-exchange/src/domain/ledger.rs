//! Per-peer accounting kept by the decision engine.

use std::collections::HashMap;
use std::time::Duration;

use shared_types::{Cid, PeerId};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Ledger {
    partner: PeerId,
    bytes_sent: u64,
    bytes_recv: u64,
    first_exchange: Option<Instant>,
    last_exchange: Option<Instant>,
    exchange_count: u64,
    /// What the partner currently wants from us, with its priorities.
    wantlist: HashMap<Cid, i32>,
    /// Blocks we sent the partner and when.
    sent_to_peer: HashMap<Cid, Instant>,
}

impl Ledger {
    pub fn new(partner: PeerId) -> Self {
        Self {
            partner,
            bytes_sent: 0,
            bytes_recv: 0,
            first_exchange: None,
            last_exchange: None,
            exchange_count: 0,
            wantlist: HashMap::new(),
            sent_to_peer: HashMap::new(),
        }
    }

    pub fn partner(&self) -> &PeerId {
        &self.partner
    }

    pub fn record_exchange(&mut self, now: Instant) {
        self.first_exchange.get_or_insert(now);
        self.last_exchange = Some(now);
        self.exchange_count += 1;
    }

    pub fn sent_bytes(&mut self, n: usize) {
        self.bytes_sent += n as u64;
    }

    pub fn received_bytes(&mut self, n: usize) {
        self.bytes_recv += n as u64;
    }

    pub fn wants(&mut self, cid: Cid, priority: i32) {
        self.wantlist.insert(cid, priority);
    }

    pub fn cancel_want(&mut self, cid: &Cid) -> bool {
        self.wantlist.remove(cid).is_some()
    }

    /// Forget the partner's wants; returns what it wanted.
    pub fn clear_wantlist(&mut self) -> Vec<Cid> {
        self.wantlist.drain().map(|(cid, _)| cid).collect()
    }

    pub fn wantlist_contains(&self, cid: &Cid) -> Option<i32> {
        self.wantlist.get(cid).copied()
    }

    /// Partner's wants by descending priority.
    pub fn wantlist(&self) -> Vec<(Cid, i32)> {
        let mut out: Vec<(Cid, i32)> = self.wantlist.iter().map(|(c, p)| (*c, *p)).collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }

    pub fn mark_sent(&mut self, cid: Cid, now: Instant) {
        self.sent_to_peer.insert(cid, now);
    }

    /// Whether `cid` was sent within `window` of `now`. Older marks are
    /// pruned as a side effect.
    pub fn recently_sent(&mut self, cid: &Cid, window: Duration, now: Instant) -> bool {
        match self.sent_to_peer.get(cid) {
            Some(at) if now.saturating_duration_since(*at) < window => true,
            Some(_) => {
                self.sent_to_peer.remove(cid);
                false
            }
            None => false,
        }
    }

    pub fn receipt(&self) -> Receipt {
        Receipt {
            peer: self.partner.clone(),
            value: self.debt_ratio(),
            sent: self.bytes_sent,
            recv: self.bytes_recv,
            exchanged: self.exchange_count,
        }
    }

    /// Bytes sent per byte received.
    pub fn debt_ratio(&self) -> f64 {
        self.bytes_sent as f64 / (self.bytes_recv as f64 + 1.0)
    }
}

/// Snapshot of a ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub peer: PeerId,
    pub value: f64,
    pub sent: u64,
    pub recv: u64,
    pub exchanged: u64,
}
