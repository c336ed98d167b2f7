//! Deterministic self-describing binary encoding.
//!
//! Every domain type that can be stored in a chunk or looked up via a bloom
//! filter / manifest implements [`Byteable`]: a reproducible `copy_to`
//! writer plus a `size()` that must equal the bytes written. [`Composite`]
//! concatenates 1..3 byteables, length-prefixed, and is the common lookup
//! key for bloom filters and manifests.

use std::io::Write;

use crate::error::{KernelError, Result};

/// A type with a canonical, reproducible binary encoding.
///
/// `size()` MUST equal the number of bytes `copy_to` writes; callers rely
/// on this to precompute buffer offsets without a dry-run write.
pub trait Byteable {
    /// Write the canonical byte encoding to `sink`.
    fn copy_to<W: Write>(&self, sink: &mut W) -> Result<()>;

    /// Exact length in bytes of `copy_to`'s output.
    fn size(&self) -> usize;

    /// Convenience: encode to a fresh `Vec<u8>`.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        // A Vec<u8> writer never fails.
        self.copy_to(&mut buf).expect("Vec<u8> write cannot fail");
        buf
    }
}

/// Variable-length concatenation of 1..3 byteables, prefixed with a count
/// byte, each component length-prefixed with a 4-byte big-endian length.
///
/// Composites round-trip: `Composite::load(bytes(c)) == c`. Equality and
/// hashing are over the exact byte sequence (content-derived), never over
/// the original typed parts, which is what lets a `Composite` built from a
/// `TableChunk` locator be compared against one built for a bloom filter
/// probe without knowing the original type.
#[derive(Debug, Clone, Eq)]
pub struct Composite {
    bytes: Vec<u8>,
    /// Byte ranges of each component within `bytes`, for `parts()`.
    part_ranges: Vec<(usize, usize)>,
}

impl Composite {
    /// Build a composite from 1..3 already-encoded parts.
    ///
    /// # Panics
    /// Panics if `parts` is empty or has more than 3 elements — this is a
    /// programmer error.
    pub fn create(parts: &[&[u8]]) -> Self {
        assert!(
            !parts.is_empty() && parts.len() <= 3,
            "Composite requires 1..3 parts, got {}",
            parts.len()
        );
        let mut bytes = Vec::with_capacity(1 + parts.iter().map(|p| 4 + p.len()).sum::<usize>());
        bytes.push(parts.len() as u8);
        let mut part_ranges = Vec::with_capacity(parts.len());
        for part in parts {
            bytes.extend_from_slice(&(part.len() as u32).to_be_bytes());
            let start = bytes.len();
            bytes.extend_from_slice(part);
            part_ranges.push((start, bytes.len()));
        }
        Self { bytes, part_ranges }
    }

    /// Build a composite from already-encoded [`Byteable`] values.
    pub fn from_byteables<T: Byteable>(parts: &[&T]) -> Self {
        let encoded: Vec<Vec<u8>> = parts.iter().map(|p| p.to_bytes()).collect();
        let refs: Vec<&[u8]> = encoded.iter().map(|v| v.as_slice()).collect();
        Self::create(&refs)
    }

    /// Parse a composite from its encoded byte form.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(KernelError::CorruptChunk(
                "composite has no count byte".into(),
            ));
        }
        let count = bytes[0] as usize;
        if count == 0 || count > 3 {
            return Err(KernelError::CorruptChunk(format!(
                "composite count byte out of range: {count}"
            )));
        }
        let mut pos = 1usize;
        let mut part_ranges = Vec::with_capacity(count);
        for _ in 0..count {
            if pos + 4 > bytes.len() {
                return Err(KernelError::CorruptChunk(
                    "composite truncated reading part length".into(),
                ));
            }
            let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let start = pos;
            if pos + len > bytes.len() {
                return Err(KernelError::CorruptChunk(
                    "composite truncated reading part bytes".into(),
                ));
            }
            pos += len;
            part_ranges.push((start, pos));
        }
        Ok(Self {
            bytes: bytes[..pos].to_vec(),
            part_ranges,
        })
    }

    /// Number of components (1..3).
    pub fn len(&self) -> usize {
        self.part_ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        false // Composite always has >= 1 part by construction.
    }

    /// Raw bytes of the `index`-th component (0-based).
    pub fn part(&self, index: usize) -> &[u8] {
        let (start, end) = self.part_ranges[index];
        &self.bytes[start..end]
    }

    /// All component byte slices in order.
    pub fn parts(&self) -> Vec<&[u8]> {
        (0..self.len()).map(|i| self.part(i)).collect()
    }

    /// Whether `self`'s parts are a byte-wise prefix of `other`'s parts
    /// (same number of leading parts, each identical). `Chunk::seek` uses
    /// this to match a 1- or 2-part lookup composite against a revision's
    /// full 3-part locator/key/value composite.
    pub fn is_prefix_of(&self, other: &Composite) -> bool {
        if self.len() > other.len() {
            return false;
        }
        (0..self.len()).all(|i| self.part(i) == other.part(i))
    }

    /// The full encoded byte sequence (count byte + length-prefixed parts).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 128-bit content hash used by the bloom filter's double-hashing probe.
    /// BLAKE3 over the exact byte sequence, split into two 64-bit halves so
    /// a single hash derives an arbitrary number of probe positions.
    pub fn hash128(&self) -> u128 {
        let digest = blake3::hash(&self.bytes);
        u128::from_le_bytes(digest.as_bytes()[0..16].try_into().unwrap())
    }
}

impl PartialEq for Composite {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl std::hash::Hash for Composite {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl Byteable for Composite {
    fn copy_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(&self.bytes)?;
        Ok(())
    }

    fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_single_part() {
        let c = Composite::create(&[b"hello"]);
        let loaded = Composite::load(c.as_bytes()).unwrap();
        assert_eq!(c, loaded);
        assert_eq!(c.len(), 1);
        assert_eq!(c.part(0), b"hello");
    }

    #[test]
    fn roundtrips_three_parts() {
        let c = Composite::create(&[b"a", b"bb", b"ccc"]);
        let loaded = Composite::load(c.as_bytes()).unwrap();
        assert_eq!(c, loaded);
        assert_eq!(loaded.parts(), vec![b"a".as_slice(), b"bb", b"ccc"]);
    }

    #[test]
    fn equality_is_byte_equality() {
        let a = Composite::create(&[b"x", b"y"]);
        let b = Composite::create(&[b"x", b"y"]);
        let c = Composite::create(&[b"x", b"z"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn is_prefix_of_checks_leading_parts() {
        let l = Composite::create(&[b"loc"]);
        let lk = Composite::create(&[b"loc", b"key"]);
        let lkv = Composite::create(&[b"loc", b"key", b"val"]);
        assert!(l.is_prefix_of(&lk));
        assert!(l.is_prefix_of(&lkv));
        assert!(lk.is_prefix_of(&lkv));
        assert!(!lkv.is_prefix_of(&lk));

        let other = Composite::create(&[b"other", b"key"]);
        assert!(!l.is_prefix_of(&other));
    }

    #[test]
    #[should_panic(expected = "Composite requires 1..3 parts")]
    fn rejects_zero_parts() {
        Composite::create(&[]);
    }

    #[test]
    #[should_panic(expected = "Composite requires 1..3 parts")]
    fn rejects_four_parts() {
        Composite::create(&[b"a", b"b", b"c", b"d"]);
    }

    #[test]
    fn load_rejects_truncated_bytes() {
        let mut bytes = Composite::create(&[b"hello"]).as_bytes().to_vec();
        bytes.truncate(bytes.len() - 2);
        assert!(Composite::load(&bytes).is_err());
    }

    #[test]
    fn load_rejects_empty_input() {
        assert!(Composite::load(&[]).is_err());
    }

    #[test]
    fn hash128_is_deterministic() {
        let a = Composite::create(&[b"k"]);
        let b = Composite::create(&[b"k"]);
        assert_eq!(a.hash128(), b.hash128());
    }
}
