//! CorpusChunk: text field → substring term → position.
//!
//! Unlike `TableChunk`/`IndexChunk`, a single logical insert fans out into
//! many substring revisions, each indexed off the critical path by the
//! [`SearchIndexer`] worker pool; the calling thread blocks on a
//! [`CountUpLatch`] until every fanned-out job completes. A `CorpusChunk`
//! is the only chunk shape that may be frozen empty.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::bloom::BloomFilter;
use crate::chunk::{Artifact, ByteSource, Chunk};
use crate::error::Result;
use crate::indexer::{CountUpLatch, SearchIndexer};
use crate::manifest::Manifest;
use crate::model::{Identifier, Position, Text, Value};
use crate::revision::{Action, CorpusRevision};

pub type CorpusArtifact = Artifact<CorpusRevision>;

/// Above this many candidate substrings for a single token, skip
/// within-token deduplication rather than grow an unbounded `HashSet` for
/// one pathological term.
const PATHOLOGICAL_SUBSTRING_THRESHOLD: usize = 5_000_000;

pub struct CorpusChunk {
    inner: Arc<Chunk<CorpusRevision>>,
}

impl CorpusChunk {
    pub fn new(expected_insertions: u64) -> Self {
        Self {
            inner: Arc::new(Chunk::new_concurrent(expected_insertions, true)),
        }
    }

    pub fn from_frozen(
        filter: BloomFilter,
        manifest: Manifest,
        source: ByteSource,
        base_offset: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Chunk::from_frozen_concurrent(filter, true, manifest, source, base_offset)),
        }
    }

    /// Index `value` (if it is a string) under `field` at `record`,
    /// returning the artifacts produced by every substring revision.
    /// `max_substring_length == 0` means unlimited. When `enabled` is
    /// `false`, indexing is skipped entirely and no revisions are
    /// produced.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        field: Text,
        value: Value,
        record: Identifier,
        version: u64,
        action: Action,
        indexer: &SearchIndexer,
        max_substring_length: usize,
        enabled: bool,
    ) -> Result<Vec<CorpusArtifact>> {
        if !enabled {
            return Ok(Vec::new());
        }
        let text = match &value {
            Value::String(t) => t.as_str().to_lowercase(),
            _ => return Ok(Vec::new()),
        };

        let latch = Arc::new(CountUpLatch::new());
        let results: Arc<Mutex<Vec<Result<CorpusArtifact>>>> = Arc::new(Mutex::new(Vec::new()));
        let mut expected: u64 = 0;

        for (token_index, token) in text.split_whitespace().enumerate() {
            let chars: Vec<char> = token.chars().collect();
            let n = chars.len();
            let candidate_count = n * (n + 1) / 2;
            let dedupe = candidate_count <= PATHOLOGICAL_SUBSTRING_THRESHOLD;
            let mut seen: HashSet<String> = HashSet::new();

            for i in 0..n {
                for j in (i + 1)..=n {
                    let len = j - i;
                    if max_substring_length > 0 && len > max_substring_length {
                        continue;
                    }
                    let substring: String = chars[i..j].iter().collect();
                    if dedupe && !seen.insert(substring.clone()) {
                        continue;
                    }

                    expected += 1;
                    let inner = self.inner.clone();
                    let field = field.clone();
                    let position = Position::new(record, token_index as i32);
                    let latch = latch.clone();
                    let results = results.clone();
                    indexer.submit(Box::new(move || {
                        let rev = CorpusRevision::new(field, Text::new(substring), position, version, action);
                        results.lock().unwrap().push(inner.insert(rev));
                        latch.count_up();
                    }));
                }
            }
        }

        latch.await_count(expected);
        let collected = std::mem::take(&mut *results.lock().unwrap());
        collected.into_iter().collect()
    }

    pub fn freeze(&self) -> Result<crate::chunk::SerializedChunk> {
        self.inner.freeze()
    }
}

impl Deref for CorpusChunk {
    type Target = Chunk<CorpusRevision>;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byteable::Composite;

    #[test]
    fn non_string_value_indexes_nothing() {
        let chunk = CorpusChunk::new(100);
        let indexer = SearchIndexer::new(3);
        let artifacts = chunk
            .insert(
                Text::new("age"),
                Value::Int64(5),
                Identifier::new(1),
                1,
                Action::Add,
                &indexer,
                0,
                true,
            )
            .unwrap();
        assert!(artifacts.is_empty());
    }

    #[test]
    fn indexes_all_substrings_of_every_token() {
        let chunk = CorpusChunk::new(1000);
        let indexer = SearchIndexer::new(3);
        let artifacts = chunk
            .insert(
                Text::new("bio"),
                Value::String(Text::new("The quick brown fox")),
                Identifier::new(1),
                100,
                Action::Add,
                &indexer,
                0,
                true,
            )
            .unwrap();
        // "the" alone has 3+2+1=6 substrings; just check the full corpus
        // produced more than the word count (substrings, not just words).
        assert!(artifacts.len() > 4);

        let probe = Composite::create(&[&Text::new("bio").to_bytes(), &Text::new("quic").to_bytes()]);
        let hits = chunk.seek(&probe).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn respects_max_substring_length() {
        let chunk = CorpusChunk::new(1000);
        let indexer = SearchIndexer::new(3);
        chunk
            .insert(
                Text::new("bio"),
                Value::String(Text::new("hello")),
                Identifier::new(1),
                1,
                Action::Add,
                &indexer,
                2,
                true,
            )
            .unwrap();
        let probe = Composite::create(&[&Text::new("bio").to_bytes(), &Text::new("hello").to_bytes()]);
        assert!(chunk.seek(&probe).unwrap().is_empty());
        let probe2 = Composite::create(&[&Text::new("bio").to_bytes(), &Text::new("he").to_bytes()]);
        assert_eq!(chunk.seek(&probe2).unwrap().len(), 1);
    }

    #[test]
    fn freezing_empty_corpus_chunk_succeeds() {
        let chunk = CorpusChunk::new(10);
        assert!(chunk.freeze().is_ok());
    }

    #[test]
    fn disabled_cache_indexes_nothing() {
        let chunk = CorpusChunk::new(1000);
        let indexer = SearchIndexer::new(3);
        let artifacts = chunk
            .insert(
                Text::new("bio"),
                Value::String(Text::new("The quick brown fox")),
                Identifier::new(1),
                1,
                Action::Add,
                &indexer,
                0,
                false,
            )
            .unwrap();
        assert!(artifacts.is_empty());
        let probe = Composite::create(&[&Text::new("bio").to_bytes(), &Text::new("quic").to_bytes()]);
        assert!(chunk.seek(&probe).unwrap().is_empty());
    }
}
