//! Graph position: a record plus the index at which it appears in an
//! ordered link collection.

use std::io::Write;

use crate::byteable::Byteable;
use crate::error::Result;
use crate::model::identifier::Identifier;

/// `(record, index)` pair. Two positions naturally order by record first,
/// then index, matching the containing collection's iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    record: Identifier,
    index: i32,
}

impl Position {
    pub fn new(record: Identifier, index: i32) -> Self {
        Self { record, index }
    }

    pub fn record(&self) -> Identifier {
        self.record
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    /// Parse from `record`'s 8 big-endian bytes followed by `index`'s 4.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let record = Identifier::new(i64::from_be_bytes(
            bytes
                .get(0..8)
                .ok_or_else(|| {
                    crate::error::KernelError::CorruptChunk("position truncated".into())
                })?
                .try_into()
                .unwrap(),
        ));
        let index = i32::from_be_bytes(
            bytes
                .get(8..12)
                .ok_or_else(|| {
                    crate::error::KernelError::CorruptChunk("position truncated".into())
                })?
                .try_into()
                .unwrap(),
        );
        Ok(Self { record, index })
    }
}

impl Byteable for Position {
    fn copy_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        self.record.copy_to(sink)?;
        sink.write_all(&self.index.to_be_bytes())?;
        Ok(())
    }

    fn size(&self) -> usize {
        self.record.size() + 4
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.record, self.index)
    }
}
