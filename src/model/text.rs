//! UTF-8 text with deterministic, length-prefixed binary encoding and
//! codepoint-lexicographic ordering.

use std::io::Write;
use std::sync::Arc;

use crate::byteable::Byteable;
use crate::error::{KernelError, Result};

/// A UTF-8 string value. Cheaply clonable (`Arc`-backed) so interning and
/// repeated composite construction don't re-allocate.
#[derive(Debug, Clone, Eq)]
pub struct Text(Arc<str>);

impl Text {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a length-prefixed (4-byte big-endian length) text value.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(KernelError::CorruptChunk("text too short for length prefix".into()));
        }
        let len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() < 4 + len {
            return Err(KernelError::CorruptChunk("text truncated".into()));
        }
        let s = std::str::from_utf8(&bytes[4..4 + len])
            .map_err(|_| KernelError::CorruptChunk("text is not valid UTF-8".into()))?;
        Ok(Self::new(s))
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::hash::Hash for Text {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for Text {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Text {
    /// Codepoint-lexicographic ordering: Rust's `str` `Ord` already compares
    /// by Unicode scalar value.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_ref().cmp(other.0.as_ref())
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Byteable for Text {
    fn copy_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        let bytes = self.0.as_bytes();
        sink.write_all(&(bytes.len() as u32).to_be_bytes())?;
        sink.write_all(bytes)?;
        Ok(())
    }

    fn size(&self) -> usize {
        4 + self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let t = Text::new("hello world");
        let bytes = t.to_bytes();
        let loaded = Text::load(&bytes).unwrap();
        assert_eq!(t, loaded);
    }

    #[test]
    fn orders_codepoint_lexicographically() {
        assert!(Text::new("a") < Text::new("b"));
        assert!(Text::new("apple") < Text::new("banana"));
        assert!(Text::new("Z") < Text::new("a")); // ASCII 'Z' (90) < 'a' (97)
    }

    #[test]
    fn roundtrips_unicode() {
        let t = Text::new("こんにちは");
        let bytes = t.to_bytes();
        assert_eq!(Text::load(&bytes).unwrap(), t);
    }

    #[test]
    fn rejects_truncated_input() {
        let mut bytes = Text::new("hello").to_bytes();
        bytes.truncate(bytes.len() - 1);
        assert!(Text::load(&bytes).is_err());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        assert!(Text::load(&bytes).is_err());
    }
}
