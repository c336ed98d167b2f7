//! Fixed-size probabilistic membership filter over [`Composite`] keys.
//!
//! Sized from `expected_insertions` for a target false-positive rate of 3%
//! at capacity. Hashing uses `num_hashes` independently seeded BLAKE3 probes
//! (double hashing), generalized to an arbitrary seed count so the encoded
//! seed array can grow with the target false-positive rate.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::byteable::Composite;
use crate::error::{KernelError, Result};

/// Target false-positive rate at capacity.
const TARGET_FPR: f64 = 0.03;
const WORD_BITS: u64 = 64;

/// Thread-safe Bloom filter. `put` and `might_contain` may run concurrently;
/// bit words are independent atomics so no external lock is needed.
#[derive(Debug)]
pub struct BloomFilter {
    num_bits: u64,
    seeds: Vec<u32>,
    words: Vec<AtomicU64>,
}

impl BloomFilter {
    /// Size a filter for `expected_insertions`, rounding the bit array up to
    /// a whole number of 64-bit words.
    pub fn new(expected_insertions: u64) -> Self {
        let n = expected_insertions.max(1) as f64;
        let bits_per_key = -TARGET_FPR.ln() / std::f64::consts::LN_2.powi(2);
        let num_hashes = ((bits_per_key * std::f64::consts::LN_2).round() as usize).max(2);
        let num_bits = ((n * bits_per_key).ceil() as u64).max(WORD_BITS);
        let num_words = num_bits.div_ceil(WORD_BITS);
        let num_bits = num_words * WORD_BITS;
        let seeds: Vec<u32> = (0..num_hashes as u32).collect();
        let words = (0..num_words).map(|_| AtomicU64::new(0)).collect();
        Self {
            num_bits,
            seeds,
            words,
        }
    }

    fn bit_index(&self, seed: u32, key: &Composite) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&seed.to_be_bytes());
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let h = u64::from_le_bytes(digest.as_bytes()[0..8].try_into().unwrap());
        h % self.num_bits
    }

    fn set_bit(&self, index: u64) {
        let word = (index / WORD_BITS) as usize;
        let bit = index % WORD_BITS;
        self.words[word].fetch_or(1u64 << bit, Ordering::Relaxed);
    }

    fn bit_is_set(&self, index: u64) -> bool {
        let word = (index / WORD_BITS) as usize;
        let bit = index % WORD_BITS;
        (self.words[word].load(Ordering::Relaxed) & (1u64 << bit)) != 0
    }

    /// Record `key`'s membership.
    pub fn put(&self, key: &Composite) {
        for &seed in &self.seeds {
            let idx = self.bit_index(seed, key);
            self.set_bit(idx);
        }
    }

    /// Returns `false` only if `key` is definitely absent.
    pub fn might_contain(&self, key: &Composite) -> bool {
        self.seeds
            .iter()
            .all(|&seed| self.bit_is_set(self.bit_index(seed, key)))
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Approximate Jaccard overlap of the bit sets of two equally-sized
    /// filters, from the popcounts of their bitwise AND and XOR: `AND /
    /// (AND + XOR)`, i.e. intersection over union of set bits. Both-empty
    /// filters are defined as fully similar.
    pub fn estimate_similarity(a: &BloomFilter, b: &BloomFilter) -> Result<f64> {
        if a.num_bits != b.num_bits {
            return Err(KernelError::IncompatibleFilterShapes {
                a: a.num_bits as usize,
                b: b.num_bits as usize,
            });
        }
        let mut and_count: u64 = 0;
        let mut xor_count: u64 = 0;
        for (wa, wb) in a.words.iter().zip(b.words.iter()) {
            let va = wa.load(Ordering::Relaxed);
            let vb = wb.load(Ordering::Relaxed);
            and_count += (va & vb).count_ones() as u64;
            xor_count += (va ^ vb).count_ones() as u64;
        }
        let union = and_count + xor_count;
        if union == 0 {
            return Ok(1.0);
        }
        Ok(and_count as f64 / union as f64)
    }

    /// Encode as `(bit_count:u32 | num_hashes:u32 | seeds:[u32;num_hashes] |
    /// bit_words:[u64])`, all big-endian.
    pub fn copy_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(&(self.num_bits as u32).to_be_bytes())?;
        sink.write_all(&(self.seeds.len() as u32).to_be_bytes())?;
        for seed in &self.seeds {
            sink.write_all(&seed.to_be_bytes())?;
        }
        for word in &self.words {
            sink.write_all(&word.load(Ordering::Relaxed).to_be_bytes())?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.copy_to(&mut buf).expect("Vec<u8> write cannot fail");
        buf
    }

    /// Parse a filter from its encoded byte form.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let err = || KernelError::CorruptChunk("bloom filter truncated".into());
        let num_bits = u32::from_be_bytes(bytes.get(0..4).ok_or_else(err)?.try_into().unwrap()) as u64;
        let num_hashes =
            u32::from_be_bytes(bytes.get(4..8).ok_or_else(err)?.try_into().unwrap()) as usize;
        let mut pos = 8usize;
        let mut seeds = Vec::with_capacity(num_hashes);
        for _ in 0..num_hashes {
            let seed = u32::from_be_bytes(bytes.get(pos..pos + 4).ok_or_else(err)?.try_into().unwrap());
            seeds.push(seed);
            pos += 4;
        }
        let num_words = num_bits.div_ceil(WORD_BITS) as usize;
        let mut words = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            let w = u64::from_be_bytes(bytes.get(pos..pos + 8).ok_or_else(err)?.try_into().unwrap());
            words.push(AtomicU64::new(w));
            pos += 8;
        }
        Ok(Self {
            num_bits,
            seeds,
            words,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Composite {
        Composite::create(&[s.as_bytes()])
    }

    #[test]
    fn put_then_might_contain() {
        let f = BloomFilter::new(100);
        f.put(&key("alice"));
        assert!(f.might_contain(&key("alice")));
    }

    #[test]
    fn absent_key_usually_not_contained() {
        let f = BloomFilter::new(1000);
        for i in 0..500 {
            f.put(&key(&format!("present-{i}")));
        }
        let mut false_positives = 0;
        for i in 0..500 {
            if f.might_contain(&key(&format!("absent-{i}"))) {
                false_positives += 1;
            }
        }
        // Well under 100% — sanity check the filter isn't saturated/broken,
        // not a tight statistical bound.
        assert!(false_positives < 250);
    }

    #[test]
    fn roundtrips_through_bytes() {
        let f = BloomFilter::new(50);
        f.put(&key("x"));
        f.put(&key("y"));
        let bytes = f.to_bytes();
        let loaded = BloomFilter::load(&bytes).unwrap();
        assert!(loaded.might_contain(&key("x")));
        assert!(loaded.might_contain(&key("y")));
        assert_eq!(loaded.num_bits(), f.num_bits());
    }

    #[test]
    fn rejects_truncated_bytes() {
        let f = BloomFilter::new(50);
        let mut bytes = f.to_bytes();
        bytes.truncate(bytes.len() - 4);
        assert!(BloomFilter::load(&bytes).is_err());
    }

    #[test]
    fn similarity_of_identical_filters_is_one() {
        let a = BloomFilter::new(100);
        a.put(&key("p"));
        a.put(&key("q"));
        let b = BloomFilter::new(100);
        b.put(&key("p"));
        b.put(&key("q"));
        let sim = BloomFilter::estimate_similarity(&a, &b).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn similarity_of_empty_filters_is_one() {
        let a = BloomFilter::new(100);
        let b = BloomFilter::new(100);
        assert_eq!(BloomFilter::estimate_similarity(&a, &b).unwrap(), 1.0);
    }

    #[test]
    fn similarity_drops_for_disjoint_filters() {
        let a = BloomFilter::new(1000);
        for i in 0..50 {
            a.put(&key(&format!("a-{i}")));
        }
        let b = BloomFilter::new(1000);
        for i in 0..50 {
            b.put(&key(&format!("b-{i}")));
        }
        let sim = BloomFilter::estimate_similarity(&a, &b).unwrap();
        assert!(sim < 0.9);
    }

    #[test]
    fn rejects_mismatched_sizes() {
        let a = BloomFilter::new(10);
        let b = BloomFilter::new(100_000);
        assert!(BloomFilter::estimate_similarity(&a, &b).is_err());
    }
}
