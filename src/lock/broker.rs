//! LockBroker: issues [`Permit`]s for [`Token`]s.
//!
//! Lock entries live in a map keyed by a token's identity bytes (`Field`/
//! `Shareable`) or by its range key (`Range`, since predicates over the
//! same key interact with each other). Eviction is lazy and refcounted:
//! `Arc::strong_count` on a map entry counts the map's own reference plus
//! one per outstanding acquirer/holder, so an entry is safe to prune the
//! moment the count drops to 1 (only the map holds it) — checked while
//! the map mutex is held, so a concurrent acquirer can never observe a
//! pruned-but-still-wanted entry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

use crate::lock::token::{Predicate, RangeToken, Token};
use crate::model::Value;

enum EntryState {
    Field {
        readers: HashSet<ThreadId>,
        writer: Option<ThreadId>,
    },
    Shareable {
        readers: HashSet<ThreadId>,
        writers: HashSet<ThreadId>,
    },
    Range {
        readers: Vec<(ThreadId, Predicate)>,
        writers: Vec<(ThreadId, Value)>,
    },
}

struct LockEntry {
    state: Mutex<EntryState>,
    cv: Condvar,
}

/// What a [`Permit`] must undo on release.
enum Hold {
    FieldRead(ThreadId),
    FieldWrite(ThreadId),
    ShareableRead(ThreadId),
    ShareableWrite(ThreadId),
    RangeRead(ThreadId, Predicate),
    RangeWrite(ThreadId, Value),
}

/// A held lock. Dropping it releases the hold and wakes any thread
/// blocked on the same entry.
pub struct Permit {
    entry: Arc<LockEntry>,
    hold: Option<Hold>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let Some(hold) = self.hold.take() else { return };
        let mut state = self.entry.state.lock().unwrap();
        match (&mut *state, hold) {
            (EntryState::Field { readers, .. }, Hold::FieldRead(t)) => {
                readers.remove(&t);
            }
            (EntryState::Field { writer, .. }, Hold::FieldWrite(t)) => {
                if *writer == Some(t) {
                    *writer = None;
                }
            }
            (EntryState::Shareable { readers, .. }, Hold::ShareableRead(t)) => {
                readers.remove(&t);
            }
            (EntryState::Shareable { writers, .. }, Hold::ShareableWrite(t)) => {
                writers.remove(&t);
            }
            (EntryState::Range { readers, .. }, Hold::RangeRead(t, p)) => {
                if let Some(i) = readers.iter().position(|(rt, rp)| *rt == t && *rp == p) {
                    readers.remove(i);
                }
            }
            (EntryState::Range { writers, .. }, Hold::RangeWrite(t, v)) => {
                if let Some(i) = writers.iter().position(|(wt, wv)| *wt == t && *wv == v) {
                    writers.remove(i);
                }
            }
            _ => unreachable!("Permit hold kind never mismatches its entry's state shape"),
        }
        drop(state);
        self.entry.cv.notify_all();
    }
}

/// Issues read/write permits for [`Token`]s, blocking callers out per
/// each token shape's blocking rules.
pub struct LockBroker {
    entries: Mutex<HashMap<Vec<u8>, Arc<LockEntry>>>,
}

impl LockBroker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn scope_key(token: &Token) -> Vec<u8> {
        match token {
            Token::Range(r) => {
                use crate::byteable::Byteable;
                r.key().to_bytes()
            }
            other => other.identity_bytes(),
        }
    }

    fn empty_state(token: &Token) -> EntryState {
        match token {
            Token::Field { .. } => EntryState::Field {
                readers: HashSet::new(),
                writer: None,
            },
            Token::Shareable { .. } => EntryState::Shareable {
                readers: HashSet::new(),
                writers: HashSet::new(),
            },
            Token::Range(_) => EntryState::Range {
                readers: Vec::new(),
                writers: Vec::new(),
            },
        }
    }

    fn entry_for(&self, token: &Token) -> Arc<LockEntry> {
        let key = Self::scope_key(token);
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, e| Arc::strong_count(e) > 1);
        entries
            .entry(key)
            .or_insert_with(|| {
                Arc::new(LockEntry {
                    state: Mutex::new(Self::empty_state(token)),
                    cv: Condvar::new(),
                })
            })
            .clone()
    }

    /// Block until `token` can be read-locked.
    pub fn read_lock(&self, token: &Token) -> Permit {
        self.try_read_lock_inner(token, true).expect("blocking acquire cannot return None")
    }

    /// Block until `token` can be write-locked.
    pub fn write_lock(&self, token: &Token) -> Permit {
        self.try_write_lock_inner(token, true).expect("blocking acquire cannot return None")
    }

    /// Non-blocking: `None` if `token` cannot be read-locked right now.
    pub fn try_read_lock(&self, token: &Token) -> Option<Permit> {
        self.try_read_lock_inner(token, false)
    }

    /// Non-blocking: `None` if `token` cannot be write-locked right now.
    pub fn try_write_lock(&self, token: &Token) -> Option<Permit> {
        self.try_write_lock_inner(token, false)
    }

    fn try_read_lock_inner(&self, token: &Token, block: bool) -> Option<Permit> {
        let entry = self.entry_for(token);
        let this_thread = std::thread::current().id();
        let mut state = entry.state.lock().unwrap();
        loop {
            let (ready, hold) = match (&mut *state, token) {
                (EntryState::Field { writer, readers }, Token::Field { .. }) => {
                    let blocked = matches!(writer, Some(w) if *w != this_thread);
                    if !blocked {
                        readers.insert(this_thread);
                    }
                    (!blocked, Hold::FieldRead(this_thread))
                }
                (EntryState::Shareable { writers, readers }, Token::Shareable { .. }) => {
                    let blocked = writers.iter().any(|w| *w != this_thread);
                    if !blocked {
                        readers.insert(this_thread);
                    }
                    (!blocked, Hold::ShareableRead(this_thread))
                }
                (EntryState::Range { writers, readers }, Token::Range(RangeToken::Reading { predicate, .. })) => {
                    let blocked = writers
                        .iter()
                        .any(|(t, v)| *t != this_thread && predicate.covers(v));
                    if !blocked {
                        readers.push((this_thread, predicate.clone()));
                    }
                    (!blocked, Hold::RangeRead(this_thread, predicate.clone()))
                }
                _ => panic!("read_lock requires a read-shaped token"),
            };
            if ready {
                return Some(Permit {
                    entry: entry.clone(),
                    hold: Some(hold),
                });
            }
            if !block {
                return None;
            }
            tracing::debug!("read lock contended, blocking");
            state = entry.cv.wait(state).unwrap();
        }
    }

    fn try_write_lock_inner(&self, token: &Token, block: bool) -> Option<Permit> {
        let entry = self.entry_for(token);
        let this_thread = std::thread::current().id();
        let mut state = entry.state.lock().unwrap();
        loop {
            let (ready, hold) = match (&mut *state, token) {
                (EntryState::Field { writer, readers }, Token::Field { .. }) => {
                    let other_reader = readers.iter().any(|r| *r != this_thread);
                    let other_writer = matches!(writer, Some(w) if *w != this_thread);
                    let blocked = other_reader || other_writer;
                    if !blocked {
                        *writer = Some(this_thread);
                    }
                    (!blocked, Hold::FieldWrite(this_thread))
                }
                (EntryState::Shareable { readers, writers }, Token::Shareable { .. }) => {
                    // Shareable writers never block each other; only an
                    // active reader excludes a writer.
                    let blocked = readers.iter().any(|r| *r != this_thread);
                    if !blocked {
                        writers.insert(this_thread);
                    }
                    (!blocked, Hold::ShareableWrite(this_thread))
                }
                (EntryState::Range { readers, writers }, Token::Range(RangeToken::Writing { value, .. })) => {
                    let blocked_by_reader = readers
                        .iter()
                        .any(|(t, p)| *t != this_thread && p.covers(value));
                    let blocked_by_writer = writers
                        .iter()
                        .any(|(t, v)| *t != this_thread && v == value);
                    let blocked = blocked_by_reader || blocked_by_writer;
                    if !blocked {
                        writers.push((this_thread, value.clone()));
                    }
                    (!blocked, Hold::RangeWrite(this_thread, value.clone()))
                }
                _ => panic!("write_lock requires a write-shaped token"),
            };
            if ready {
                return Some(Permit {
                    entry: entry.clone(),
                    hold: Some(hold),
                });
            }
            if !block {
                return None;
            }
            tracing::debug!("write lock contended, blocking");
            state = entry.cv.wait(state).unwrap();
        }
    }
}

impl Default for LockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identifier, Text};
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn two_readers_on_same_field_do_not_block() {
        let broker = LockBroker::new();
        let token = Token::field(Text::new("name"), Identifier::new(1));
        let _p1 = broker.try_read_lock(&token).unwrap();
        let _p2 = broker.try_read_lock(&token).unwrap();
    }

    #[test]
    fn writer_blocks_other_thread_reader() {
        let broker = StdArc::new(LockBroker::new());
        let token = Token::field(Text::new("name"), Identifier::new(1));
        let _w = broker.write_lock(&token);

        let broker2 = broker.clone();
        let token2 = token.clone();
        let handle = thread::spawn(move || broker2.try_read_lock(&token2).is_none());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn shareable_writers_do_not_block_each_other() {
        let broker = StdArc::new(LockBroker::new());
        let token = Token::shareable(Text::new("name"), Identifier::new(1));
        let _w1 = broker.try_write_lock(&token).unwrap();

        let broker2 = broker.clone();
        let token2 = token.clone();
        let handle = thread::spawn(move || broker2.try_write_lock(&token2).is_some());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn range_read_blocks_overlapping_point_write() {
        let broker = StdArc::new(LockBroker::new());
        let read_token = RangeToken::for_reading(
            Text::new("age"),
            Predicate::Between(Value::Int64(0), Value::Int64(100)),
        );
        let _r = broker.read_lock(&read_token);

        let broker2 = broker.clone();
        let write_token = RangeToken::for_writing(Text::new("age"), Value::Int64(50));
        let handle = thread::spawn(move || broker2.try_write_lock(&write_token).is_none());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn range_write_then_own_read_is_not_blocked() {
        let broker = LockBroker::new();
        let write_token = RangeToken::for_writing(Text::new("age"), Value::Int64(50));
        let _w = broker.write_lock(&write_token);

        let read_token = RangeToken::for_reading(
            Text::new("age"),
            Predicate::Between(Value::Int64(0), Value::Int64(100)),
        );
        assert!(broker.try_read_lock(&read_token).is_some());
    }

    #[test]
    fn releasing_a_permit_wakes_a_blocked_writer() {
        let broker = StdArc::new(LockBroker::new());
        let token = Token::field(Text::new("name"), Identifier::new(1));
        let reader = broker.read_lock(&token);

        let broker2 = broker.clone();
        let token2 = token.clone();
        let handle = thread::spawn(move || {
            let _w = broker2.write_lock(&token2);
        });

        thread::sleep(Duration::from_millis(20));
        drop(reader);
        handle.join().unwrap();
    }
}
