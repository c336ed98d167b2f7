//! Chunk: a sorted multiset of revisions of one shape, paired with a bloom
//! filter and manifest.
//!
//! [`Chunk<R>`] implements the shared mutable-insert / seek / serialize /
//! freeze behavior once, generic over the revision shape `R`; the three
//! concrete views ([`table::TableChunk`], [`index::IndexChunk`],
//! [`corpus::CorpusChunk`]) add shape-specific `make_revision`/`insert`
//! wrappers. `SerialChunk` inserts serialize through a single read/write
//! lock; `ConcurrentChunk` (used only by `CorpusChunk`, whose insert volume
//! is multiplied by substring fan-out) shards inserts across independent
//! mutexes keyed by locator hash.

pub mod corpus;
pub mod index;
pub mod table;

use std::io::Write as IoWrite;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::bloom::BloomFilter;
use crate::byteable::{Byteable, Composite};
use crate::error::{KernelError, Result};
use crate::manifest::{Manifest, ManifestBuilder};
use crate::revision::RevisionLike;

pub use corpus::{CorpusArtifact, CorpusChunk};
pub use index::{IndexArtifact, IndexChunk};
pub use table::{TableArtifact, TableChunk};

/// An insert receipt: the stored revision plus its three locating
/// composites.
#[derive(Debug, Clone)]
pub struct Artifact<R> {
    pub revision: R,
    pub composites: [Composite; 3],
}

/// Result of [`Chunk::serialize`]/[`Chunk::freeze`]: the manifest plus its
/// own persisted bytes, and the chunk's serialized revision stream.
pub struct SerializedChunk {
    pub manifest: Manifest,
    pub manifest_bytes: Vec<u8>,
    pub chunk_bytes: Vec<u8>,
}

const CONCURRENT_SHARDS: usize = 16;

enum Backing<R> {
    Serial(RwLock<Vec<R>>),
    Concurrent(Vec<Mutex<Vec<R>>>),
}

/// Bytes backing a frozen chunk's on-disk revisions: either an in-memory
/// buffer (immediately after a local `freeze`, before the owning segment
/// has synced to disk) or a memory-mapped region of a loaded segment file.
#[derive(Clone)]
pub enum ByteSource {
    Owned(Arc<Vec<u8>>),
    Mapped(Arc<memmap2::Mmap>),
}

impl ByteSource {
    fn as_slice(&self) -> &[u8] {
        match self {
            ByteSource::Owned(v) => v,
            ByteSource::Mapped(m) => m,
        }
    }
}

struct FrozenState {
    manifest: Manifest,
    source: ByteSource,
    base_offset: usize,
}

/// Generic chunk shared by the three concrete shapes.
pub struct Chunk<R: RevisionLike> {
    backing: Backing<R>,
    filter: BloomFilter,
    size: AtomicU64,
    mutable: AtomicBool,
    allow_empty_freeze: bool,
    frozen: RwLock<Option<FrozenState>>,
}

fn shard_index(locator_composite: &Composite, shards: usize) -> usize {
    (locator_composite.hash128() % shards as u128) as usize
}

impl<R: RevisionLike> Chunk<R> {
    pub fn new_serial(expected_insertions: u64, allow_empty_freeze: bool) -> Self {
        Self {
            backing: Backing::Serial(RwLock::new(Vec::new())),
            filter: BloomFilter::new(expected_insertions),
            size: AtomicU64::new(0),
            mutable: AtomicBool::new(true),
            allow_empty_freeze,
            frozen: RwLock::new(None),
        }
    }

    pub fn new_concurrent(expected_insertions: u64, allow_empty_freeze: bool) -> Self {
        let shards = (0..CONCURRENT_SHARDS).map(|_| Mutex::new(Vec::new())).collect();
        Self {
            backing: Backing::Concurrent(shards),
            filter: BloomFilter::new(expected_insertions),
            size: AtomicU64::new(0),
            mutable: AtomicBool::new(true),
            allow_empty_freeze,
            frozen: RwLock::new(None),
        }
    }

    /// Build a chunk already in its frozen, disk-backed state — used when
    /// loading a synced segment rather than writing a new one.
    pub fn from_frozen_serial(
        filter: BloomFilter,
        allow_empty_freeze: bool,
        manifest: Manifest,
        source: ByteSource,
        base_offset: usize,
    ) -> Self {
        let chunk = Self {
            backing: Backing::Serial(RwLock::new(Vec::new())),
            filter,
            size: AtomicU64::new(0),
            mutable: AtomicBool::new(false),
            allow_empty_freeze,
            frozen: RwLock::new(None),
        };
        chunk.attach_source(manifest, source, base_offset);
        chunk
    }

    /// As [`Self::from_frozen_serial`], for the concurrent-backing flavor.
    pub fn from_frozen_concurrent(
        filter: BloomFilter,
        allow_empty_freeze: bool,
        manifest: Manifest,
        source: ByteSource,
        base_offset: usize,
    ) -> Self {
        let shards = (0..CONCURRENT_SHARDS).map(|_| Mutex::new(Vec::new())).collect();
        let chunk = Self {
            backing: Backing::Concurrent(shards),
            filter,
            size: AtomicU64::new(0),
            mutable: AtomicBool::new(false),
            allow_empty_freeze,
            frozen: RwLock::new(None),
        };
        chunk.attach_source(manifest, source, base_offset);
        chunk
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable.load(Ordering::Acquire)
    }

    /// Exact serialized byte length.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn might_contain(&self, composite: &Composite) -> bool {
        self.filter.might_contain(composite)
    }

    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    /// Insert a pre-built revision: updates the filter at all three
    /// granularities, appends to the backing multiset, and returns an
    /// [`Artifact`]. Fails with `ImmutableChunk` once frozen.
    pub fn insert(&self, revision: R) -> Result<Artifact<R>> {
        if !self.is_mutable() {
            return Err(KernelError::ImmutableChunk);
        }
        let (l, lk, lkv) = revision.composites();
        self.filter.put(&l);
        self.filter.put(&lk);
        self.filter.put(&lkv);
        self.size
            .fetch_add(4 + revision.size() as u64, Ordering::AcqRel);
        match &self.backing {
            Backing::Serial(lock) => lock.write().unwrap().push(revision.clone()),
            Backing::Concurrent(shards) => {
                let idx = shard_index(&l, shards.len());
                shards[idx].lock().unwrap().push(revision.clone());
            }
        }
        Ok(Artifact {
            revision,
            composites: [l, lk, lkv],
        })
    }

    /// All currently-resident revisions, sorted by `(locator, key,
    /// version, value)`. Only valid while mutable.
    fn sorted_snapshot(&self) -> Vec<R> {
        let mut all: Vec<R> = match &self.backing {
            Backing::Serial(lock) => lock.read().unwrap().clone(),
            Backing::Concurrent(shards) => shards
                .iter()
                .flat_map(|shard| shard.lock().unwrap().clone())
                .collect(),
        };
        all.sort();
        all
    }

    /// Every revision whose locator/key/[value] matches `composite`,
    /// collected into a `Vec` rather than pushed through a sink parameter —
    /// callers already get an owned `Result<Vec<_>>` back from everything
    /// else in this crate.
    pub fn seek(&self, composite: &Composite) -> Result<Vec<R>> {
        if !self.filter.might_contain(composite) {
            return Ok(Vec::new());
        }
        if self.is_mutable() {
            let sorted = self.sorted_snapshot();
            let mut out = Vec::new();
            let mut emitting = false;
            for rev in sorted {
                let (_, _, lkv) = rev.composites();
                let matches = composite.is_prefix_of(&lkv);
                if matches {
                    emitting = true;
                    out.push(rev);
                } else if emitting {
                    break;
                }
            }
            Ok(out)
        } else {
            // The manifest only records `(L)` and `(L,K)` group boundaries
            // (see `serialize`), so a 3-part `(L,K,V)` composite has no
            // entry of its own: look up its `(L,K)` prefix instead and
            // filter the resulting region down to exact matches.
            let lookup_key = if composite.len() == 3 {
                Composite::create(&[composite.part(0), composite.part(1)])
            } else {
                composite.clone()
            };
            let guard = self.frozen.read().unwrap();
            let frozen = guard.as_ref().expect("frozen chunk missing disk source");
            let range = frozen.manifest.lookup(&lookup_key)?;
            if range.is_null() {
                return Ok(Vec::new());
            }
            let slice = frozen.source.as_slice();
            let start = frozen.base_offset + range.start as usize;
            let end = frozen.base_offset + range.end as usize;
            let region = slice.get(start..end).ok_or_else(|| {
                KernelError::LengthMismatch {
                    declared: (end - start) as u64,
                    actual: slice.len().saturating_sub(start) as u64,
                }
            })?;
            let revisions = parse_revisions(region)?;
            if composite.len() != 3 {
                return Ok(revisions);
            }
            Ok(revisions
                .into_iter()
                .filter(|rev| {
                    let (_, _, lkv) = rev.composites();
                    composite.is_prefix_of(&lkv)
                })
                .collect())
        }
    }

    /// Produce a manifest and the chunk's serialized revision bytes,
    /// recording `put_start`/`put_end` group boundaries for `(L)` and
    /// `(L,K)` as the locator/key change across the sorted stream.
    pub fn serialize(&self) -> Result<SerializedChunk> {
        if !self.is_mutable() {
            return Err(KernelError::ImmutableChunk);
        }
        let sorted = self.sorted_snapshot();
        if sorted.is_empty() && !self.allow_empty_freeze {
            return Err(KernelError::EmptyChunk);
        }
        let mut builder = ManifestBuilder::new();
        let mut bytes = Vec::new();
        let mut pos: i64 = 0;
        let mut prev_l: Option<Composite> = None;
        let mut prev_lk: Option<Composite> = None;
        for rev in &sorted {
            let (l, lk, _lkv) = rev.composites();
            if prev_l.as_ref() != Some(&l) {
                if let Some(pl) = &prev_l {
                    builder.put_end(pos, pl)?;
                }
                builder.put_start(pos, &l)?;
                prev_l = Some(l);
                prev_lk = None;
            }
            if prev_lk.as_ref() != Some(&lk) {
                if let Some(plk) = &prev_lk {
                    builder.put_end(pos, plk)?;
                }
                builder.put_start(pos, &lk)?;
                prev_lk = Some(lk);
            }
            let rb = rev.to_bytes();
            bytes.write_all(&(rb.len() as u32).to_be_bytes())?;
            bytes.write_all(&rb)?;
            pos += 4 + rb.len() as i64;
        }
        if let Some(pl) = &prev_l {
            builder.put_end(pos, pl)?;
        }
        if let Some(plk) = &prev_lk {
            builder.put_end(pos, plk)?;
        }
        let (manifest, manifest_bytes) = builder.finish();
        Ok(SerializedChunk {
            manifest,
            manifest_bytes,
            chunk_bytes: bytes,
        })
    }

    /// Transition to immutable and drop the in-memory backing multiset,
    /// returning the same [`SerializedChunk`] `serialize` would. The
    /// caller (`Segment::sync`) is responsible for calling
    /// [`Self::attach_source`] once those bytes are durably placed.
    pub fn freeze(&self) -> Result<SerializedChunk> {
        let serialized = self.serialize()?;
        tracing::debug!(bytes = serialized.chunk_bytes.len(), "froze chunk");
        self.mutable.store(false, Ordering::Release);
        match &self.backing {
            Backing::Serial(lock) => lock.write().unwrap().clear(),
            Backing::Concurrent(shards) => {
                for shard in shards {
                    shard.lock().unwrap().clear();
                }
            }
        }
        Ok(serialized)
    }

    /// Attach the durable byte source a frozen chunk reads through.
    /// `base_offset` is where this chunk's revision bytes begin within
    /// `source`.
    pub fn attach_source(&self, manifest: Manifest, source: ByteSource, base_offset: usize) {
        *self.frozen.write().unwrap() = Some(FrozenState {
            manifest,
            source,
            base_offset,
        });
    }

    /// Release the resident manifest map under memory pressure; a no-op
    /// while mutable.
    pub fn evict_manifest(&self) {
        if let Some(frozen) = self.frozen.read().unwrap().as_ref() {
            frozen.manifest.evict();
        }
    }
}

fn parse_revisions<R: RevisionLike>(bytes: &[u8]) -> Result<Vec<R>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        if pos + 4 > bytes.len() {
            return Err(KernelError::CorruptChunk(
                "chunk region truncated reading revision length".into(),
            ));
        }
        let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + len > bytes.len() {
            return Err(KernelError::CorruptChunk(
                "chunk region truncated reading revision bytes".into(),
            ));
        }
        out.push(R::load_from_bytes(&bytes[pos..pos + len])?);
        pos += len;
    }
    Ok(out)
}
