//! Probabilistic negative cache over event ids (spec §3.2). Never authoritative:
//! a positive is always re-checked against SQL (P10: `!mayContain ⇒ !Exists`).

use crate::common::consts::{BLOOM_EXPECTED_ITEMS, BLOOM_FALSE_POSITIVE_RATE};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// A fixed-size bit array with Kirsch-Mitzenmacher double hashing, sized for
/// `BLOOM_EXPECTED_ITEMS` entries at `BLOOM_FALSE_POSITIVE_RATE`.
pub struct BloomFilter {
    bits: Vec<AtomicU64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn new_default() -> Self {
        Self::new(BLOOM_EXPECTED_ITEMS, BLOOM_FALSE_POSITIVE_RATE)
    }

    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let num_bits = optimal_num_bits(expected_items, false_positive_rate);
        let num_hashes = optimal_num_hashes(expected_items, num_bits);
        let words = (num_bits / 64) + 1;
        let bits = (0..words).map(|_| AtomicU64::new(0)).collect();
        Self { bits, num_bits, num_hashes }
    }

    /// Tests membership. A `false` result is authoritative; a `true` result
    /// is a hint that must be re-verified against the store.
    pub fn may_contain(&self, id: &str) -> bool {
        let (h1, h2) = double_hash(id);
        for i in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, i);
            if !self.get(bit) {
                return false;
            }
        }
        true
    }

    /// Adds an id to the filter. Safe under concurrent readers and writers.
    pub fn insert(&self, id: &str) {
        let (h1, h2) = double_hash(id);
        for i in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, i);
            self.set(bit);
        }
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    fn get(&self, bit: u64) -> bool {
        let word = &self.bits[(bit / 64) as usize];
        let mask = 1u64 << (bit % 64);
        word.load(Ordering::Relaxed) & mask != 0
    }

    fn set(&self, bit: u64) {
        let word = &self.bits[(bit / 64) as usize];
        let mask = 1u64 << (bit % 64);
        word.fetch_or(mask, Ordering::Relaxed);
    }
}

fn double_hash(id: &str) -> (u64, u64) {
    let digest = Sha256::digest(id.as_bytes());
    let h1 = u64::from_le_bytes(digest[0..8].try_into().unwrap());
    let h2 = u64::from_le_bytes(digest[8..16].try_into().unwrap());
    (h1, h2 | 1) // keep h2 odd so it can't collapse the cycle on power-of-two-ish moduli
}

fn optimal_num_bits(n: usize, p: f64) -> u64 {
    let n = n as f64;
    let m = -(n * p.ln()) / (std::f64::consts::LN_2.powi(2));
    m.ceil().max(64.0) as u64
}

fn optimal_num_hashes(n: usize, m: u64) -> u32 {
    let k = (m as f64 / n as f64) * std::f64::consts::LN_2;
    k.round().clamp(1.0, 32.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_ids_are_found() {
        let bf = BloomFilter::new(1000, 0.01);
        bf.insert("abc123");
        assert!(bf.may_contain("abc123"));
    }

    #[test]
    fn absent_ids_are_usually_rejected() {
        let bf = BloomFilter::new(1000, 0.01);
        bf.insert("a");
        bf.insert("b");
        assert!(!bf.may_contain("definitely-not-inserted"));
    }

    #[test]
    fn sizing_scales_with_expected_items() {
        let small = BloomFilter::new(100, 0.01);
        let large = BloomFilter::new(1_000_000, 0.01);
        assert!(large.num_bits > small.num_bits);
    }
}
