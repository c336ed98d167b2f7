//! Record identifier: a 64-bit signed integer.

use std::io::Write;

use crate::byteable::Byteable;
use crate::error::Result;

/// A record id. Equality and natural ordering are numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(pub i64);

impl Identifier {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for Identifier {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl Byteable for Identifier {
    fn copy_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(&self.0.to_be_bytes())?;
        Ok(())
    }

    fn size(&self) -> usize {
        8
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_numerically() {
        assert!(Identifier::new(1) < Identifier::new(2));
        assert!(Identifier::new(-5) < Identifier::new(0));
    }

    #[test]
    fn encodes_big_endian_i64() {
        let id = Identifier::new(1);
        assert_eq!(id.to_bytes(), 1i64.to_be_bytes().to_vec());
        assert_eq!(id.size(), 8);
    }
}
