//! ToggleQueue: the write-ahead buffer in front of a mutable `Segment`.
//!
//! Writes here toggle: an `ADD` queued against a prior `REMOVE` for the
//! same `(locator, key, value, version)` cancels it outright rather than
//! replacing it, via a side map from logical key to storage slot.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::byteable::Byteable;
use crate::error::Result;
use crate::segment::{Receipt, Segment, Write};

/// A page's record encoding on disk: `(entry_size:u32 | write-bytes |
/// tombstone:u8)`. `entry_size` covers only `write-bytes`.
fn toggle_key(w: &Write) -> Vec<u8> {
    let mut key = Vec::new();
    for part in [
        w.locator.to_bytes(),
        w.key.to_bytes(),
        w.value.to_bytes(),
    ] {
        key.extend_from_slice(&(part.len() as u32).to_be_bytes());
        key.extend_from_slice(&part);
    }
    key.extend_from_slice(&w.version.to_be_bytes());
    key
}

struct Slot {
    write: Option<Write>,
}

struct Inner {
    slots: Vec<Slot>,
    /// toggle_key -> live slot index, absent once canceled.
    live: HashMap<Vec<u8>, usize>,
}

/// A persisted, ordered log of pending writes that cancel each other out
/// at matching `(locator, key, value, version)` before ever reaching a
/// segment.
pub struct ToggleQueue {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl ToggleQueue {
    /// `page_size` is the `buffer_page_size` transfer threshold: once the
    /// number of live (non-tombstoned) entries reaches it, `transfer`
    /// should be called to drain the page into a segment.
    pub fn new(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                live: HashMap::new(),
            }),
            page_size,
        }
    }

    /// Enqueue `w`. If a prior entry with the same `(locator, key, value,
    /// version)` and the opposite action is still live, both cancel: the
    /// prior entry's slot is tombstoned and `w` is never stored. Otherwise
    /// `w` is appended as a new live slot. Returns whether `w` ended up
    /// queued (`false` means it canceled an existing entry).
    pub fn push(&self, w: Write) -> bool {
        let key = toggle_key(&w);
        let mut inner = self.inner.lock().unwrap();

        if let Some(&idx) = inner.live.get(&key) {
            let existing_action = inner.slots[idx].write.as_ref().map(|e| e.action);
            if existing_action == Some(w.action.inverse()) {
                inner.slots[idx].write = None;
                inner.live.remove(&key);
                return false;
            }
            // Same action re-queued for the same tuple/version: replace
            // in place rather than growing a second live slot for it.
            inner.slots[idx].write = Some(w);
            return true;
        }

        let idx = inner.slots.len();
        inner.slots.push(Slot { write: Some(w) });
        inner.live.insert(key, idx);
        true
    }

    /// Number of live (non-tombstoned) entries.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the live-entry count has reached the transfer threshold.
    pub fn should_transfer(&self) -> bool {
        self.len() >= self.page_size
    }

    /// Clone of every live (non-tombstoned) write, in insertion order,
    /// without draining the queue. Used by readers that must see their
    /// own not-yet-transferred writes alongside whatever has already
    /// landed in segments.
    pub fn snapshot(&self) -> Vec<Write> {
        self.inner
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter_map(|slot| slot.write.clone())
            .collect()
    }

    /// A marker for the current slot count, to be passed to [`Self::rollback`]
    /// to discard everything pushed since. Used by staged mutation batches
    /// that abort.
    pub fn mark(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    /// Discard every slot pushed since `mark` was taken, canceled or not.
    /// Only valid if nothing has been transferred (which clears all slots)
    /// in between — callers that interleave staged batches with transfers
    /// must not straddle a transfer with a rollback.
    pub fn rollback(&self, mark: usize) {
        let mut inner = self.inner.lock().unwrap();
        if mark >= inner.slots.len() {
            return;
        }
        inner.slots.truncate(mark);
        inner.live.retain(|_, idx| *idx < mark);
    }

    /// Writes in insertion order, skipping tombstoned slots.
    fn drain_ordered(&self) -> Vec<Write> {
        let mut inner = self.inner.lock().unwrap();
        inner.live.clear();
        inner
            .slots
            .drain(..)
            .filter_map(|slot| slot.write)
            .collect()
    }

    /// Drain every live write (in insertion order) into `segment` via
    /// `acquire`. The page is only emptied once every write has been
    /// successfully acquired; on the first failure the remaining writes
    /// (including the failing one) are put back at the front of the
    /// queue so a retry sees them again.
    pub fn transfer(&self, segment: &Segment) -> Result<Vec<Receipt>> {
        let mut writes = self.drain_ordered().into_iter();
        let mut receipts = Vec::new();
        while let Some(w) = writes.next() {
            match segment.acquire(&w) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => {
                    for remaining in std::iter::once(w).chain(writes) {
                        self.push(remaining);
                    }
                    return Err(e);
                }
            }
        }
        Ok(receipts)
    }

    /// Serialize the live entries as an ordered log page:
    /// `(entry_size:u32 | write-bytes | tombstone:u8)` per slot, in
    /// original insertion order including tombstoned slots, so the log
    /// replays deterministically even though canceled slots carry no
    /// write bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for slot in &inner.slots {
            match &slot.write {
                Some(w) => {
                    let bytes = encode_write(w);
                    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    out.extend_from_slice(&bytes);
                    out.push(0);
                }
                None => {
                    out.extend_from_slice(&0u32.to_be_bytes());
                    out.push(1);
                }
            }
        }
        out
    }
}

fn encode_write(w: &Write) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(w.action.byte());
    for part in [w.locator.to_bytes(), w.key.to_bytes(), w.value.to_bytes()] {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
        out.extend_from_slice(&part);
    }
    out.extend_from_slice(&w.version.to_be_bytes());
    out
}
