//! Hash functions for the Bloom filter
//!
//! MurmurHash3 x64/128 with two seeds, combined by double hashing.

use std::io::Cursor;

/// Hash an element with MurmurHash3 using `seed`, keeping the low 64 bits.
pub fn murmur_hash(element: &[u8], seed: u32) -> u64 {
    let mut cursor = Cursor::new(element);
    // Reading from an in-memory cursor cannot fail.
    let hash = murmur3::murmur3_x64_128(&mut cursor, seed).unwrap_or(0);
    hash as u64
}

/// The `k` bit positions for an element in a filter of `m` bits.
///
/// Uses double hashing: h(i) = h1 + i * h2.
pub fn hash_positions(element: &[u8], k: usize, m: usize) -> impl Iterator<Item = usize> {
    let h1 = murmur_hash(element, 0);
    let h2 = murmur_hash(element, 1);
    let m = m.max(1) as u64;

    (0..k).map(move |i| {
        let hash = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (hash % m) as usize
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_hash_deterministic() {
        let element = b"bafkreib";
        assert_eq!(murmur_hash(element, 7), murmur_hash(element, 7));
    }

    #[test]
    fn test_murmur3_different_seed_different_output() {
        let element = b"bafkreib";
        assert_ne!(murmur_hash(element, 0), murmur_hash(element, 1));
    }

    #[test]
    fn test_positions_within_bounds() {
        let positions: Vec<usize> = hash_positions(b"element", 7, 1000).collect();
        assert_eq!(positions.len(), 7);
        assert!(positions.iter().all(|&p| p < 1000));
    }
}
