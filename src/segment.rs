//! Segment: an immutable-once-synced bundle of one TableChunk, IndexChunk,
//! and CorpusChunk plus their filters and manifests.
//!
//! File layout (all multi-byte integers big-endian):
//!
//! ```text
//! FILE_SIGNATURE           13 bytes  literal "Cinchapi Inc."
//! schema_version            1 byte
//! count                      8 bytes  u64
//! minTs, maxTs, syncTs      24 bytes  u64 each
//! reserved                  32 bytes  (four u64)
//! table.filter.size          8 bytes
//! index.filter.size          8 bytes
//! corpus.filter.size         8 bytes
//! table.manifest.length       8 bytes
//! index.manifest.length       8 bytes
//! corpus.manifest.length      8 bytes
//! table.size                  8 bytes
//! index.size                  8 bytes
//! corpus.size                 8 bytes
//! <table.filter><index.filter><corpus.filter>
//! <table.manifest><index.manifest><corpus.manifest>
//! <table.chunk><index.chunk><corpus.chunk>
//! ```
//!
//! The writer/reader split (build the header with placeholder lengths,
//! append every region in order, mmap it back in on load) keeps a
//! segment's on-disk bytes identical whether they were just synced in
//! this process or reopened from a file written by another one.

use std::io::Write as IoWrite;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::bloom::BloomFilter;
use crate::chunk::{ByteSource, CorpusChunk, IndexChunk, TableChunk};
use crate::error::{KernelError, Result};
use crate::indexer::SearchIndexer;
use crate::manifest::Manifest;
use crate::model::{Identifier, Text, Value};
use crate::revision::{Action, IndexRevision, TableRevision};

pub const FILE_SIGNATURE: &[u8; 13] = b"Cinchapi Inc.";
pub const SCHEMA_VERSION: u8 = 1;
const HEADER_LEN: usize = 13 + 1 + 8 + 24 + 32 + 8 * 9;

/// A write destined for `Segment::acquire`.
#[derive(Debug, Clone)]
pub struct Write {
    pub action: Action,
    pub locator: Identifier,
    pub key: Text,
    pub value: Value,
    pub version: u64,
}

impl Write {
    pub fn new(action: Action, locator: Identifier, key: Text, value: Value, version: u64) -> Self {
        Self {
            action,
            locator,
            key,
            value,
            version,
        }
    }

    pub fn inverse(&self) -> Self {
        Self {
            action: self.action.inverse(),
            ..self.clone()
        }
    }

    pub fn rewrite(&self, new_version: u64) -> Self {
        Self {
            version: new_version,
            ..self.clone()
        }
    }
}

/// Receipt of a successful `acquire`: the table and index revisions
/// produced. Corpus revisions are intentionally not itemized — a single
/// write can fan out into many substring entries, and callers only ever
/// need the table/index revisions to report back a version.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub table: TableRevision,
    pub index: IndexRevision,
}

/// A Segment's position in its owning tier — opaque to this crate, carried
/// so callers (and the temporal comparator) can distinguish segments.
pub type SegmentPosition = u64;

pub struct Segment {
    table: TableChunk,
    index: IndexChunk,
    corpus: CorpusChunk,
    mutable: AtomicBool,
    write_lock: Mutex<()>,
    min_ts: AtomicU64,
    max_ts: AtomicU64,
    sync_ts: AtomicU64,
    indexer: Arc<SearchIndexer>,
    max_substring_length: usize,
    search_cache_enabled: bool,
    position: SegmentPosition,
}

impl Segment {
    pub fn new(
        position: SegmentPosition,
        expected_insertions: u64,
        indexer: Arc<SearchIndexer>,
        max_substring_length: usize,
        search_cache_enabled: bool,
    ) -> Self {
        Self {
            table: TableChunk::new(expected_insertions),
            index: IndexChunk::new(expected_insertions),
            corpus: CorpusChunk::new(expected_insertions),
            mutable: AtomicBool::new(true),
            write_lock: Mutex::new(()),
            min_ts: AtomicU64::new(u64::MAX),
            max_ts: AtomicU64::new(0),
            sync_ts: AtomicU64::new(0),
            indexer,
            max_substring_length,
            search_cache_enabled,
            position,
        }
    }

    pub fn position(&self) -> SegmentPosition {
        self.position
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable.load(Ordering::Acquire)
    }

    pub fn min_ts(&self) -> u64 {
        self.min_ts.load(Ordering::Acquire)
    }

    pub fn max_ts(&self) -> u64 {
        self.max_ts.load(Ordering::Acquire)
    }

    pub fn sync_ts(&self) -> u64 {
        self.sync_ts.load(Ordering::Acquire)
    }

    pub fn table(&self) -> &TableChunk {
        &self.table
    }

    pub fn index(&self) -> &IndexChunk {
        &self.index
    }

    pub fn corpus(&self) -> &CorpusChunk {
        &self.corpus
    }

    /// Requires the segment be mutable; takes the segment-global write
    /// lock and dispatches three parallel subtasks (one per chunk).
    pub fn acquire(&self, w: &Write) -> Result<Receipt> {
        if !self.is_mutable() {
            return Err(KernelError::ImmutableChunk);
        }
        let _guard = self.write_lock.lock().unwrap();

        let (table_result, (index_result, corpus_result)) = rayon::join(
            || {
                self.table
                    .insert(w.locator, w.key.clone(), w.value.clone(), w.version, w.action)
            },
            || {
                rayon::join(
                    || {
                        self.index
                            .insert(w.key.clone(), w.value.clone(), w.locator, w.version, w.action)
                    },
                    || {
                        self.corpus.insert(
                            w.key.clone(),
                            w.value.clone(),
                            w.locator,
                            w.version,
                            w.action,
                            &self.indexer,
                            self.max_substring_length,
                            self.search_cache_enabled,
                        )
                    },
                )
            },
        );

        let table_artifact = table_result?;
        let index_artifact = index_result?;
        let _corpus_artifacts = corpus_result?;

        self.min_ts.fetch_min(w.version, Ordering::AcqRel);
        self.max_ts.fetch_max(w.version, Ordering::AcqRel);

        Ok(Receipt {
            table: table_artifact.revision,
            index: index_artifact.revision,
        })
    }

    /// Serialize, freeze every chunk, and produce the segment's exact
    /// on-disk byte layout.
    pub fn sync(&self) -> Result<Vec<u8>> {
        let _guard = self.write_lock.lock().unwrap();
        tracing::debug!(position = self.position, "syncing segment");

        let table_serialized = self.table.freeze()?;
        let index_serialized = self.index.freeze()?;
        let corpus_serialized = self.corpus.freeze()?;

        let table_filter = self.table.filter().to_bytes();
        let index_filter = self.index.filter().to_bytes();
        let corpus_filter = self.corpus.filter().to_bytes();

        let sync_ts = now_micros();
        self.sync_ts.store(sync_ts, Ordering::Release);
        let revision_count = count_revisions(&index_serialized.chunk_bytes);

        let mut out = Vec::with_capacity(
            HEADER_LEN
                + table_filter.len()
                + index_filter.len()
                + corpus_filter.len()
                + table_serialized.manifest_bytes.len()
                + index_serialized.manifest_bytes.len()
                + corpus_serialized.manifest_bytes.len()
                + table_serialized.chunk_bytes.len()
                + index_serialized.chunk_bytes.len()
                + corpus_serialized.chunk_bytes.len(),
        );

        out.write_all(FILE_SIGNATURE)?;
        out.write_all(&[SCHEMA_VERSION])?;
        out.write_all(&revision_count.to_be_bytes())?;
        out.write_all(&self.min_ts().to_be_bytes())?;
        out.write_all(&self.max_ts().to_be_bytes())?;
        out.write_all(&sync_ts.to_be_bytes())?;
        out.write_all(&[0u8; 32])?; // reserved
        out.write_all(&(table_filter.len() as u64).to_be_bytes())?;
        out.write_all(&(index_filter.len() as u64).to_be_bytes())?;
        out.write_all(&(corpus_filter.len() as u64).to_be_bytes())?;
        out.write_all(&(table_serialized.manifest_bytes.len() as u64).to_be_bytes())?;
        out.write_all(&(index_serialized.manifest_bytes.len() as u64).to_be_bytes())?;
        out.write_all(&(corpus_serialized.manifest_bytes.len() as u64).to_be_bytes())?;
        out.write_all(&(table_serialized.chunk_bytes.len() as u64).to_be_bytes())?;
        out.write_all(&(index_serialized.chunk_bytes.len() as u64).to_be_bytes())?;
        out.write_all(&(corpus_serialized.chunk_bytes.len() as u64).to_be_bytes())?;

        out.write_all(&table_filter)?;
        out.write_all(&index_filter)?;
        out.write_all(&corpus_filter)?;
        out.write_all(&table_serialized.manifest_bytes)?;
        out.write_all(&index_serialized.manifest_bytes)?;
        out.write_all(&corpus_serialized.manifest_bytes)?;
        out.write_all(&table_serialized.chunk_bytes)?;
        out.write_all(&index_serialized.chunk_bytes)?;
        out.write_all(&corpus_serialized.chunk_bytes)?;

        self.attach_in_memory(
            table_serialized.manifest,
            index_serialized.manifest,
            corpus_serialized.manifest,
            Arc::new(out.clone()),
            table_serialized.chunk_bytes.len(),
            index_serialized.chunk_bytes.len(),
            corpus_serialized.chunk_bytes.len(),
        );
        self.mutable.store(false, Ordering::Release);
        Ok(out)
    }

    /// Write `sync()`'s bytes to `path`.
    pub fn sync_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.sync()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn attach_in_memory(
        &self,
        table_manifest: Manifest,
        index_manifest: Manifest,
        corpus_manifest: Manifest,
        data: Arc<Vec<u8>>,
        table_len: usize,
        index_len: usize,
        corpus_len: usize,
    ) {
        let table_offset = data.len() - table_len - index_len - corpus_len;
        let index_offset = table_offset + table_len;
        let corpus_offset = index_offset + index_len;
        let source = ByteSource::Owned(data);
        self.table
            .attach_source(table_manifest, source.clone(), table_offset);
        self.index
            .attach_source(index_manifest, source.clone(), index_offset);
        self.corpus
            .attach_source(corpus_manifest, source, corpus_offset);
    }

    /// Load a synced segment from `bytes` (typically a memory-mapped
    /// file). `streaming_threshold` governs each manifest's eager-vs-
    /// streaming load strategy; `read_buffer_size` bounds how much of a
    /// streaming manifest's background fill is parsed per published
    /// batch.
    pub fn load(
        bytes: Arc<memmap2::Mmap>,
        streaming_threshold: u64,
        read_buffer_size: usize,
        indexer: Arc<SearchIndexer>,
        max_substring_length: usize,
        search_cache_enabled: bool,
    ) -> Result<Self> {
        let data: &[u8] = &bytes;
        tracing::debug!(bytes = data.len(), "loading segment");
        if data.len() < HEADER_LEN {
            return Err(KernelError::SegmentLoadError("file shorter than header".into()));
        }
        if &data[0..13] != FILE_SIGNATURE.as_slice() {
            return Err(KernelError::BadSignature(data[0..13].to_vec()));
        }
        let schema_version = data[13];
        if schema_version != SCHEMA_VERSION {
            return Err(KernelError::UnsupportedSegmentVersion(schema_version));
        }
        let mut cursor = 14usize;
        let count = read_u64(data, &mut cursor)?;
        let min_ts = read_u64(data, &mut cursor)?;
        let max_ts = read_u64(data, &mut cursor)?;
        let sync_ts = read_u64(data, &mut cursor)?;
        cursor += 32; // reserved
        let table_filter_size = read_u64(data, &mut cursor)? as usize;
        let index_filter_size = read_u64(data, &mut cursor)? as usize;
        let corpus_filter_size = read_u64(data, &mut cursor)? as usize;
        let table_manifest_len = read_u64(data, &mut cursor)? as usize;
        let index_manifest_len = read_u64(data, &mut cursor)? as usize;
        let corpus_manifest_len = read_u64(data, &mut cursor)? as usize;
        let table_size = read_u64(data, &mut cursor)? as usize;
        let index_size = read_u64(data, &mut cursor)? as usize;
        let corpus_size = read_u64(data, &mut cursor)? as usize;
        let _ = count;

        let err = || KernelError::SegmentLoadError("truncated region".into());
        let mut pos = HEADER_LEN;
        let table_filter_bytes = data.get(pos..pos + table_filter_size).ok_or_else(err)?;
        pos += table_filter_size;
        let index_filter_bytes = data.get(pos..pos + index_filter_size).ok_or_else(err)?;
        pos += index_filter_size;
        let corpus_filter_bytes = data.get(pos..pos + corpus_filter_size).ok_or_else(err)?;
        pos += corpus_filter_size;

        let table_manifest_bytes = data.get(pos..pos + table_manifest_len).ok_or_else(err)?.to_vec();
        pos += table_manifest_len;
        let index_manifest_bytes = data.get(pos..pos + index_manifest_len).ok_or_else(err)?.to_vec();
        pos += index_manifest_len;
        let corpus_manifest_bytes = data.get(pos..pos + corpus_manifest_len).ok_or_else(err)?.to_vec();
        pos += corpus_manifest_len;

        let table_offset = pos;
        pos += table_size;
        let index_offset = pos;
        pos += index_size;
        let corpus_offset = pos;
        pos += corpus_size;
        if pos > data.len() {
            return Err(err());
        }

        let table_filter = BloomFilter::load(table_filter_bytes)?;
        let index_filter = BloomFilter::load(index_filter_bytes)?;
        let corpus_filter = BloomFilter::load(corpus_filter_bytes)?;

        let table_manifest = Manifest::load(table_manifest_bytes, streaming_threshold, read_buffer_size)?;
        let index_manifest = Manifest::load(index_manifest_bytes, streaming_threshold, read_buffer_size)?;
        let corpus_manifest = Manifest::load(corpus_manifest_bytes, streaming_threshold, read_buffer_size)?;

        let table = TableChunk::from_frozen(table_filter, table_manifest, ByteSource::Mapped(bytes.clone()), table_offset);
        let index = IndexChunk::from_frozen(index_filter, index_manifest, ByteSource::Mapped(bytes.clone()), index_offset);
        let corpus = CorpusChunk::from_frozen(corpus_filter, corpus_manifest, ByteSource::Mapped(bytes.clone()), corpus_offset);

        Ok(Self {
            table,
            index,
            corpus,
            mutable: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            min_ts: AtomicU64::new(min_ts),
            max_ts: AtomicU64::new(max_ts),
            sync_ts: AtomicU64::new(sync_ts),
            indexer,
            max_substring_length,
            search_cache_enabled,
            position: 0,
        })
    }

    /// `max(similarity(table filters), similarity(index filters))`, used
    /// by compaction heuristics.
    pub fn similarity_with(&self, other: &Segment) -> Result<f64> {
        let table_sim = BloomFilter::estimate_similarity(self.table.filter(), other.table.filter())?;
        let index_sim = BloomFilter::estimate_similarity(self.index.filter(), other.index.filter())?;
        Ok(table_sim.max(index_sim))
    }

    /// Total order across segments: disjoint time ranges order by time;
    /// otherwise by `syncTs`, with an immutable (synced) segment always
    /// ordering before a mutable one it's compared against.
    pub fn temporal_cmp(&self, other: &Segment) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        if self.max_ts() < other.min_ts() {
            return Ordering::Less;
        }
        if self.min_ts() > other.max_ts() {
            return Ordering::Greater;
        }
        match (self.is_mutable(), other.is_mutable()) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => self.sync_ts().cmp(&other.sync_ts()),
        }
    }
}

fn read_u64(data: &[u8], cursor: &mut usize) -> Result<u64> {
    let bytes = data
        .get(*cursor..*cursor + 8)
        .ok_or_else(|| KernelError::SegmentLoadError("truncated header".into()))?;
    *cursor += 8;
    Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
}

fn count_revisions(index_chunk_bytes: &[u8]) -> u64 {
    let mut n = 0u64;
    let mut pos = 0usize;
    while pos + 4 <= index_chunk_bytes.len() {
        let len = u32::from_be_bytes(index_chunk_bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4 + len;
        n += 1;
    }
    n
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_segment() -> Segment {
        Segment::new(0, 100, Arc::new(SearchIndexer::new(3)), 0, true)
    }

    #[test]
    fn acquire_then_sync_then_load_round_trips() {
        let segment = fresh_segment();
        segment
            .acquire(&Write::new(
                Action::Add,
                Identifier::new(1),
                Text::new("a"),
                Value::Int64(1),
                100,
            ))
            .unwrap();
        segment
            .acquire(&Write::new(
                Action::Add,
                Identifier::new(1),
                Text::new("a"),
                Value::Int64(2),
                101,
            ))
            .unwrap();
        segment
            .acquire(&Write::new(
                Action::Add,
                Identifier::new(2),
                Text::new("b"),
                Value::String(Text::new("x")),
                102,
            ))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment.dat");
        segment.sync_to_file(&path).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let mmap = unsafe { memmap2::Mmap::map(&file).unwrap() };
        let loaded = Segment::load(
            Arc::new(mmap),
            32 * 1024 * 1024,
            64 * 1024,
            Arc::new(SearchIndexer::new(3)),
            0,
            true,
        )
        .unwrap();

        let probe = crate::byteable::Composite::create(&[&Identifier::new(1).to_bytes()]);
        let hits = loaded.table().seek(&probe).unwrap();
        assert_eq!(hits.len(), 2);

        let find_probe = crate::byteable::Composite::create(&[
            &Text::new("a").to_bytes(),
            &Value::Int64(1).to_bytes(),
        ]);
        let index_hits = loaded.index().seek(&find_probe).unwrap();
        assert_eq!(index_hits.len(), 1);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut bytes = vec![0u8; HEADER_LEN + 8];
        bytes[0..13].copy_from_slice(b"Not Cinchapi.");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dat");
        std::fs::write(&path, &bytes).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let mmap = unsafe { memmap2::Mmap::map(&file).unwrap() };
        let err = Segment::load(Arc::new(mmap), 1024, 64 * 1024, Arc::new(SearchIndexer::new(3)), 0, true);
        assert!(matches!(err, Err(KernelError::BadSignature(_))));
    }

    #[test]
    fn acquire_on_frozen_segment_fails() {
        let segment = fresh_segment();
        segment
            .acquire(&Write::new(
                Action::Add,
                Identifier::new(1),
                Text::new("a"),
                Value::Bool(true),
                1,
            ))
            .unwrap();
        segment.sync().unwrap();
        let err = segment.acquire(&Write::new(
            Action::Add,
            Identifier::new(2),
            Text::new("b"),
            Value::Bool(true),
            2,
        ));
        assert!(err.is_err());
    }

    #[test]
    fn similarity_of_identical_segments_is_high() {
        let a = fresh_segment();
        a.acquire(&Write::new(
            Action::Add,
            Identifier::new(1),
            Text::new("x"),
            Value::Int64(1),
            1,
        ))
        .unwrap();
        let b = fresh_segment();
        b.acquire(&Write::new(
            Action::Add,
            Identifier::new(1),
            Text::new("x"),
            Value::Int64(1),
            1,
        ))
        .unwrap();
        assert!(a.similarity_with(&b).unwrap() > 0.5);
    }
}
