//! Manifest: `Composite -> byte Range` index for a single chunk.
//!
//! [`ManifestBuilder`] accumulates `put_start`/`put_end` pairs while a chunk
//! is being serialized; [`ManifestBuilder::finish`] freezes it into a
//! read-only [`Manifest`] plus its persisted byte form. Loading a persisted
//! manifest (`Manifest::load`) picks one of two strategies based on size:
//! an eager heap map below `streaming_threshold`, or a background-filled
//! streaming scan above it, so a huge manifest never blocks segment load
//! on a full parse.

use std::collections::HashMap;
use std::io::Write as IoWrite;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::byteable::Composite;
use crate::error::{KernelError, Result};

pub const NO_ENTRY: i64 = -1;

/// Byte offsets `[start, end)` of a composite's revisions within a chunk's
/// serialized stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

impl Range {
    pub const NULL: Range = Range {
        start: NO_ENTRY,
        end: NO_ENTRY,
    };

    pub fn is_null(&self) -> bool {
        self.start == NO_ENTRY && self.end == NO_ENTRY
    }
}

/// Accumulates entries while a chunk is being written.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    order: Vec<Vec<u8>>,
    ranges: HashMap<Vec<u8>, Range>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a range at `pos` for `composite`. Creates the entry with
    /// `end=NO_ENTRY` if absent, otherwise updates `start` in place.
    pub fn put_start(&mut self, pos: i64, composite: &Composite) -> Result<()> {
        if pos < 0 {
            return Err(KernelError::InvalidPosition(pos));
        }
        let key = composite.as_bytes().to_vec();
        match self.ranges.get_mut(&key) {
            Some(range) => range.start = pos,
            None => {
                self.ranges.insert(
                    key.clone(),
                    Range {
                        start: pos,
                        end: NO_ENTRY,
                    },
                );
                self.order.push(key);
            }
        }
        Ok(())
    }

    /// Close the range at `pos` for `composite`. Requires a prior
    /// `put_start`.
    pub fn put_end(&mut self, pos: i64, composite: &Composite) -> Result<()> {
        if pos < 0 {
            return Err(KernelError::InvalidPosition(pos));
        }
        let key = composite.as_bytes().to_vec();
        match self.ranges.get_mut(&key) {
            Some(range) if range.start != NO_ENTRY => {
                range.end = pos;
                Ok(())
            }
            _ => Err(KernelError::MissingStart),
        }
    }

    pub fn lookup(&self, composite: &Composite) -> Range {
        self.ranges
            .get(composite.as_bytes())
            .copied()
            .unwrap_or(Range::NULL)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Freeze into a read-only [`Manifest`] plus its persisted byte form:
    /// an ordered sequence of `(entry_size:u32 | start:i64 | end:i64 |
    /// composite-bytes)` records, `entry_size` covering only the variable
    /// composite-bytes tail.
    pub fn finish(self) -> (Manifest, Vec<u8>) {
        let mut bytes = Vec::new();
        for key in &self.order {
            let range = self.ranges[key];
            bytes
                .write_all(&(key.len() as u32).to_be_bytes())
                .unwrap();
            bytes.write_all(&range.start.to_be_bytes()).unwrap();
            bytes.write_all(&range.end.to_be_bytes()).unwrap();
            bytes.write_all(key).unwrap();
        }
        let manifest = Manifest {
            bytes: Arc::new(bytes.clone()),
            backing: Backing::Eager(Mutex::new(Some(self.ranges))),
        };
        (manifest, bytes)
    }
}

enum Backing {
    Eager(Mutex<Option<HashMap<Vec<u8>, Range>>>),
    Streaming(Arc<StreamingState>),
}

/// A read-only, persisted manifest.
pub struct Manifest {
    bytes: Arc<Vec<u8>>,
    backing: Backing,
}

impl Manifest {
    /// Load a persisted manifest, choosing eager or streaming strategy by
    /// comparing its byte length against `streaming_threshold`.
    /// `read_buffer_size` bounds how many bytes of the streaming path's
    /// background fill are parsed before results are published and the
    /// lock is briefly reacquired, trading fill latency for lock churn.
    pub fn load(bytes: Vec<u8>, streaming_threshold: u64, read_buffer_size: usize) -> Result<Self> {
        let bytes = Arc::new(bytes);
        if (bytes.len() as u64) < streaming_threshold {
            let map = parse_all(&bytes)?;
            Ok(Self {
                bytes,
                backing: Backing::Eager(Mutex::new(Some(map))),
            })
        } else {
            let state = StreamingState::spawn(bytes.clone(), read_buffer_size.max(1));
            Ok(Self {
                bytes,
                backing: Backing::Streaming(state),
            })
        }
    }

    /// Look up the byte range for `composite`, or [`Range::NULL`] if
    /// absent.
    pub fn lookup(&self, composite: &Composite) -> Result<Range> {
        match &self.backing {
            Backing::Eager(slot) => {
                let mut guard = slot.lock().unwrap();
                if guard.is_none() {
                    *guard = Some(parse_all(&self.bytes)?);
                }
                Ok(guard
                    .as_ref()
                    .unwrap()
                    .get(composite.as_bytes())
                    .copied()
                    .unwrap_or(Range::NULL))
            }
            Backing::Streaming(state) => Ok(state.lookup(composite.as_bytes())),
        }
    }

    /// Release the resident eager map so the allocator can reclaim it; a
    /// subsequent `lookup` reloads it from the retained raw bytes. No-op
    /// for a streaming manifest, whose background fill already owns its
    /// own bounded state.
    pub fn evict(&self) {
        if let Backing::Eager(slot) = &self.backing {
            *slot.lock().unwrap() = None;
        }
    }
}

fn parse_all(bytes: &[u8]) -> Result<HashMap<Vec<u8>, Range>> {
    let mut map = HashMap::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let (key, range, next) = parse_one(bytes, pos)?;
        map.insert(key, range);
        pos = next;
    }
    Ok(map)
}

fn parse_one(bytes: &[u8], pos: usize) -> Result<(Vec<u8>, Range, usize)> {
    let err = || KernelError::CorruptChunk("manifest record truncated".into());
    let len = u32::from_be_bytes(bytes.get(pos..pos + 4).ok_or_else(err)?.try_into().unwrap())
        as usize;
    let start = i64::from_be_bytes(
        bytes
            .get(pos + 4..pos + 12)
            .ok_or_else(err)?
            .try_into()
            .unwrap(),
    );
    let end = i64::from_be_bytes(
        bytes
            .get(pos + 12..pos + 20)
            .ok_or_else(err)?
            .try_into()
            .unwrap(),
    );
    let key_start = pos + 20;
    let key_end = key_start + len;
    let key = bytes.get(key_start..key_end).ok_or_else(err)?.to_vec();
    Ok((key, Range { start, end }, key_end))
}

struct StreamingInner {
    found: HashMap<Vec<u8>, Range>,
    done: bool,
}

struct StreamingState {
    inner: Mutex<StreamingInner>,
    cv: Condvar,
}

impl StreamingState {
    /// `read_buffer_size` bounds how many bytes are parsed between lock
    /// acquisitions: the background thread accumulates entries until it
    /// has consumed at least that many bytes of the manifest, then
    /// publishes them in one batch rather than locking per entry.
    fn spawn(bytes: Arc<Vec<u8>>, read_buffer_size: usize) -> Arc<Self> {
        let this = Arc::new(Self {
            inner: Mutex::new(StreamingInner {
                found: HashMap::new(),
                done: false,
            }),
            cv: Condvar::new(),
        });
        let background = this.clone();
        thread::spawn(move || {
            let mut pos = 0usize;
            let mut batch_start = 0usize;
            let mut batch: Vec<(Vec<u8>, Range)> = Vec::new();
            loop {
                if pos >= bytes.len() || pos - batch_start >= read_buffer_size {
                    if !batch.is_empty() {
                        let mut guard = background.inner.lock().unwrap();
                        guard.found.extend(batch.drain(..));
                        background.cv.notify_all();
                    }
                    batch_start = pos;
                }
                if pos >= bytes.len() {
                    break;
                }
                match parse_one(&bytes, pos) {
                    Ok((key, range, next)) => {
                        pos = next;
                        batch.push((key, range));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "manifest background fill stopped early");
                        break;
                    }
                }
            }
            let mut guard = background.inner.lock().unwrap();
            guard.done = true;
            background.cv.notify_all();
        });
        this
    }

    /// Blocks until the key is found or the background fill finishes.
    fn lookup(&self, key: &[u8]) -> Range {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(range) = guard.found.get(key) {
                return *range;
            }
            if guard.done {
                return Range::NULL;
            }
            guard = self.cv.wait(guard).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composite(s: &str) -> Composite {
        Composite::create(&[s.as_bytes()])
    }

    #[test]
    fn put_start_then_end_records_range() {
        let mut b = ManifestBuilder::new();
        let c = composite("a");
        b.put_start(10, &c).unwrap();
        b.put_end(20, &c).unwrap();
        assert_eq!(b.lookup(&c), Range { start: 10, end: 20 });
    }

    #[test]
    fn put_end_without_start_fails() {
        let mut b = ManifestBuilder::new();
        assert!(b.put_end(5, &composite("a")).is_err());
    }

    #[test]
    fn negative_position_is_rejected() {
        let mut b = ManifestBuilder::new();
        assert!(b.put_start(-1, &composite("a")).is_err());
    }

    #[test]
    fn lookup_of_absent_key_is_null_range() {
        let b = ManifestBuilder::new();
        assert_eq!(b.lookup(&composite("missing")), Range::NULL);
    }

    #[test]
    fn finish_roundtrips_through_eager_load() {
        let mut b = ManifestBuilder::new();
        let a = composite("a");
        let z = composite("z");
        b.put_start(0, &a).unwrap();
        b.put_end(10, &a).unwrap();
        b.put_start(10, &z).unwrap();
        b.put_end(30, &z).unwrap();
        let (_, bytes) = b.finish();

        let loaded = Manifest::load(bytes, 32 * 1024 * 1024, 64 * 1024).unwrap();
        assert_eq!(loaded.lookup(&a).unwrap(), Range { start: 0, end: 10 });
        assert_eq!(loaded.lookup(&z).unwrap(), Range { start: 10, end: 30 });
        assert_eq!(loaded.lookup(&composite("missing")).unwrap(), Range::NULL);
    }

    #[test]
    fn streaming_load_finds_entries() {
        let mut b = ManifestBuilder::new();
        for i in 0..200u32 {
            let c = composite(&format!("key-{i:04}"));
            b.put_start(i as i64, &c).unwrap();
            b.put_end((i + 1) as i64, &c).unwrap();
        }
        let (_, bytes) = b.finish();
        // threshold of 0 forces the streaming path regardless of size.
        let loaded = Manifest::load(bytes, 0, 64 * 1024).unwrap();
        let probe = composite("key-0199");
        let range = loaded.lookup(&probe).unwrap();
        assert_eq!(range, Range { start: 199, end: 200 });
        assert_eq!(loaded.lookup(&composite("nope")).unwrap(), Range::NULL);
    }

    #[test]
    fn streaming_load_batches_by_read_buffer_size() {
        let mut b = ManifestBuilder::new();
        for i in 0..50u32 {
            let c = composite(&format!("key-{i:04}"));
            b.put_start(i as i64, &c).unwrap();
            b.put_end((i + 1) as i64, &c).unwrap();
        }
        let (_, bytes) = b.finish();
        // A read buffer smaller than a single entry still makes progress:
        // every entry is its own batch.
        let loaded = Manifest::load(bytes, 0, 1).unwrap();
        let probe = composite("key-0049");
        assert_eq!(loaded.lookup(&probe).unwrap(), Range { start: 49, end: 50 });
    }

    #[test]
    fn evict_then_lookup_reloads_from_bytes() {
        let mut b = ManifestBuilder::new();
        let c = composite("a");
        b.put_start(1, &c).unwrap();
        b.put_end(2, &c).unwrap();
        let (manifest, _) = b.finish();
        manifest.evict();
        assert_eq!(manifest.lookup(&c).unwrap(), Range { start: 1, end: 2 });
    }
}
