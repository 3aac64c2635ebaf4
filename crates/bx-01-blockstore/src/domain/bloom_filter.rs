//! Concurrent Bloom filter
//!
//! INVARIANTS:
//! - No false negatives: once `add(x)` returns, `has(x)` is true forever.
//! - FPR = (1 - e^(-kn/m))^k for n insertions.
//!
//! Bits live in `AtomicU64` words. Additions are word-level `fetch_or`, so
//! readers and writers proceed without a lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::hash_functions::hash_positions;

/// Lock-free Bloom filter over byte strings.
#[derive(Debug)]
pub struct AtomicBloomFilter {
    words: Box<[AtomicU64]>,
    /// Size in bits (m)
    m: usize,
    /// Number of hash functions (k)
    k: usize,
    /// Insertions so far (n), approximate under races
    n: AtomicUsize,
}

impl AtomicBloomFilter {
    /// Filter of `m` bits using `k` hash functions.
    pub fn new(m: usize, k: usize) -> Self {
        let m = m.max(64);
        let words = (0..m.div_ceil(64)).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            m,
            k: k.max(1),
            n: AtomicUsize::new(0),
        }
    }

    /// Filter occupying `bytes` bytes.
    pub fn with_bytes(bytes: usize, k: usize) -> Self {
        Self::new(bytes.saturating_mul(8), k)
    }

    pub fn add(&self, element: &[u8]) {
        for pos in hash_positions(element, self.k, self.m) {
            let mask = 1u64 << (pos % 64);
            self.words[pos / 64].fetch_or(mask, Ordering::Relaxed);
        }
        self.n.fetch_add(1, Ordering::Relaxed);
    }

    /// `false` means definitely absent; `true` means possibly present.
    pub fn has(&self, element: &[u8]) -> bool {
        hash_positions(element, self.k, self.m).all(|pos| {
            let mask = 1u64 << (pos % 64);
            self.words[pos / 64].load(Ordering::Relaxed) & mask != 0
        })
    }

    pub fn size_bits(&self) -> usize {
        self.m
    }

    pub fn hash_count(&self) -> usize {
        self.k
    }

    pub fn inserted(&self) -> usize {
        self.n.load(Ordering::Relaxed)
    }

    /// Fraction of bits set.
    pub fn fill_ratio(&self) -> f64 {
        let ones: u32 = self
            .words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones())
            .sum();
        f64::from(ones) / self.m as f64
    }

    /// Expected false-positive rate at the current insertion count.
    pub fn estimated_fpr(&self) -> f64 {
        calculate_fpr(self.m, self.inserted(), self.k)
    }
}

/// FPR = (1 - e^(-kn/m))^k
pub fn calculate_fpr(m: usize, n: usize, k: usize) -> f64 {
    if m == 0 {
        return 1.0;
    }
    let exponent = -(k as f64) * (n as f64) / (m as f64);
    (1.0 - exponent.exp()).powi(k as i32)
}
