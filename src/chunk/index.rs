//! IndexChunk: key → value → identifier.
//!
//! Before insert, `key` is replaced with `Value::optimize(key)` so
//! numerically-equal values of different widths match under equality
//! lookup.

use std::ops::Deref;

use crate::bloom::BloomFilter;
use crate::chunk::{Artifact, ByteSource, Chunk};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::model::{Identifier, Text, Value};
use crate::revision::{Action, IndexRevision};

pub type IndexArtifact = Artifact<IndexRevision>;

pub struct IndexChunk(Chunk<IndexRevision>);

impl IndexChunk {
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
        key: Text,
        value: Value,
        record: Identifier,
        version: u64,
        action: Action,
    ) -> IndexRevision {
        IndexRevision::new(key, value.optimize(), record, version, action)
    }

    pub fn insert(
        &self,
        key: Text,
        value: Value,
        record: Identifier,
        version: u64,
        action: Action,
    ) -> Result<IndexArtifact> {
        self.0
            .insert(Self::make_revision(key, value, record, version, action))
    }
}

impl Deref for IndexChunk {
    type Target = Chunk<IndexRevision>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
