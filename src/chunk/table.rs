//! TableChunk: identifier → key → value.

use std::ops::Deref;

use crate::bloom::BloomFilter;
use crate::chunk::{Artifact, ByteSource, Chunk};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::model::{Identifier, Text, Value};
use crate::revision::{Action, TableRevision};

pub type TableArtifact = Artifact<TableRevision>;

pub struct TableChunk(Chunk<TableRevision>);

impl TableChunk {
    pub fn new(expected_insertions: u64) -> Self {
        Self(Chunk::new_serial(expected_insertions, false))
    }

    pub fn from_frozen(
        filter: BloomFilter,
        manifest: Manifest,
        source: ByteSource,
        base_offset: usize,
    ) -> Self {
        Self(Chunk::from_frozen_serial(filter, false, manifest, source, base_offset))
    }

    pub fn make_revision(
        id: Identifier,
        key: Text,
        value: Value,
        version: u64,
        action: Action,
    ) -> TableRevision {
        TableRevision::new(id, key, value, version, action)
    }

    pub fn insert(
        &self,
        id: Identifier,
        key: Text,
        value: Value,
        version: u64,
        action: Action,
    ) -> Result<TableArtifact> {
        self.0.insert(Self::make_revision(id, key, value, version, action))
    }
}

impl Deref for TableChunk {
    type Target = Chunk<TableRevision>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byteable::Composite;

    #[test]
    fn insert_then_seek_by_full_key() {
        let chunk = TableChunk::new(100);
        chunk
            .insert(
                Identifier::new(1),
                Text::new("name"),
                Value::String(Text::new("jeff")),
                100,
                Action::Add,
            )
            .unwrap();
        let composite = Composite::create(&[
            &Identifier::new(1).to_bytes(),
            &Text::new("name").to_bytes(),
            &Value::String(Text::new("jeff")).to_bytes(),
        ]);
        let hits = chunk.seek(&composite).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].version(), 100);
    }

    #[test]
    fn insert_into_frozen_chunk_fails() {
        let chunk = TableChunk::new(10);
        chunk
            .insert(
                Identifier::new(1),
                Text::new("k"),
                Value::Bool(true),
                1,
                Action::Add,
            )
            .unwrap();
        chunk.freeze().unwrap();
        let err = chunk.insert(
            Identifier::new(1),
            Text::new("k"),
            Value::Bool(false),
            2,
            Action::Add,
        );
        assert!(err.is_err());
    }

    #[test]
    fn freezing_empty_table_chunk_fails() {
        let chunk = TableChunk::new(10);
        assert!(chunk.serialize().is_err());
    }
}
