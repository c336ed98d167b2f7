//! Database façade: the operations a caller actually issues, built from
//! the buffer, segments, lock broker, and clock underneath. This is a
//! working reference implementation of those operations, not a query
//! planner.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::buffer::ToggleQueue;
use crate::byteable::{Byteable, Composite};
use crate::clock::VersionClock;
use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::indexer::SearchIndexer;
use crate::lock::{LockBroker, Token};
use crate::metrics::{Metrics, Operation};
use crate::model::{Identifier, Text, Value};
use crate::revision::Action;
use crate::segment::{Segment, Write};

/// A single timeline event used to fold ADD/REMOVE toggles into present
/// state, shared by `select`/`chronologize`/`audit`/`find`.
struct Event<K> {
    version: u64,
    group: K,
    value: Value,
    action: Action,
}

/// Orchestrates a buffer, an ordered chain of segments (oldest first,
/// the last one mutable), a lock broker, and a version clock into a
/// single read/write surface.
pub struct Database {
    segments: RwLock<Vec<Arc<Segment>>>,
    buffer: ToggleQueue,
    locks: LockBroker,
    clock: VersionClock,
    indexer: Arc<SearchIndexer>,
    config: KernelConfig,
    metrics: Metrics,
    stage_depth: AtomicUsize,
    stage_mark: Mutex<Option<usize>>,
}

impl Database {
    pub fn new(config: KernelConfig, expected_insertions: u64) -> Self {
        let indexer = Arc::new(SearchIndexer::new(config.indexer_threads));
        let initial = Arc::new(Segment::new(
            0,
            expected_insertions,
            indexer.clone(),
            config.max_search_substring_length,
            config.enable_search_cache,
        ));
        Self {
            segments: RwLock::new(vec![initial]),
            buffer: ToggleQueue::new(config.buffer_page_size.max(1)),
            locks: LockBroker::new(),
            clock: VersionClock::new(),
            indexer,
            config,
            metrics: Metrics::new(),
            stage_depth: AtomicUsize::new(0),
            stage_mark: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn mutable_segment(&self) -> Arc<Segment> {
        self.segments.read().unwrap().last().unwrap().clone()
    }

    /// Transfer the buffer into the active segment, unless a staged
    /// batch is open (the outermost `commit` does it instead).
    fn maybe_transfer(&self) -> Result<()> {
        if self.stage_depth.load(Ordering::Acquire) > 0 {
            return Ok(());
        }
        if self.buffer.should_transfer() {
            let started = std::time::Instant::now();
            self.buffer.transfer(&self.mutable_segment())?;
            self.metrics
                .record(Operation::Transfer, started.elapsed().as_micros() as u64);
        }
        Ok(())
    }

    fn push(&self, w: Write) -> Result<()> {
        self.buffer.push(w);
        self.maybe_transfer()
    }

    // -- Mutation -------------------------------------------------------

    /// Reject a `Link` value that targets the record it would be written
    /// onto: a record cannot link to itself.
    fn check_not_self_link(value: &Value, record: Identifier) -> Result<()> {
        if let Value::Link(target) = value {
            if *target == record {
                return Err(KernelError::SelfLink(record.value()));
            }
        }
        Ok(())
    }

    pub fn add(&self, key: Text, value: Value, record: Identifier) -> Result<()> {
        Self::check_not_self_link(&value, record)?;
        let token = Token::field(key.clone(), record);
        let _permit = self.locks.write_lock(&token);
        let version = self.clock.next();
        self.push(Write::new(Action::Add, record, key, value, version))
    }

    pub fn remove(&self, key: Text, value: Value, record: Identifier) -> Result<()> {
        let token = Token::field(key.clone(), record);
        let _permit = self.locks.write_lock(&token);
        let version = self.clock.next();
        self.push(Write::new(Action::Remove, record, key, value, version))
    }

    /// Remove every value currently present for `key` on `record`, then
    /// add `value`, all under one held write lock.
    pub fn set(&self, key: Text, value: Value, record: Identifier) -> Result<()> {
        Self::check_not_self_link(&value, record)?;
        let token = Token::field(key.clone(), record);
        let _permit = self.locks.write_lock(&token);
        let current = self.select_key_record(&key, record, u64::MAX)?;
        for existing in current {
            if existing == value {
                continue;
            }
            let version = self.clock.next();
            self.push(Write::new(Action::Remove, record, key.clone(), existing, version))?;
        }
        if !self.select_key_record(&key, record, u64::MAX)?.contains(&value) {
            let version = self.clock.next();
            self.push(Write::new(Action::Add, record, key, value, version))?;
        }
        Ok(())
    }

    // -- Reads ------------------------------------------------------------

    fn table_timeline(&self, composite: &Composite, at_version: u64) -> Result<Vec<Event<Text>>> {
        let mut events = Vec::new();
        for seg in self.segments.read().unwrap().iter() {
            for r in seg.table().seek(composite)? {
                if r.version() <= at_version {
                    events.push(Event {
                        version: r.version(),
                        group: r.key().clone(),
                        value: r.value().clone(),
                        action: r.action(),
                    });
                }
            }
        }
        for w in self.buffer.snapshot() {
            if w.version <= at_version {
                let matches = match composite.len() {
                    1 => Composite::create(&[&w.locator.to_bytes()]).as_bytes() == composite.as_bytes(),
                    _ => {
                        Composite::create(&[&w.locator.to_bytes(), &w.key.to_bytes()]).as_bytes()
                            == composite.as_bytes()
                    }
                };
                if matches {
                    events.push(Event {
                        version: w.version,
                        group: w.key.clone(),
                        value: w.value.clone(),
                        action: w.action,
                    });
                }
            }
        }
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    fn select_key_record(&self, key: &Text, record: Identifier, at_version: u64) -> Result<HashSet<Value>> {
        let composite = Composite::create(&[&record.to_bytes(), &key.to_bytes()]);
        let started = std::time::Instant::now();
        let events = self.table_timeline(&composite, at_version)?;
        self.metrics
            .record(Operation::Seek, started.elapsed().as_micros() as u64);
        let mut present = HashSet::new();
        for e in events {
            match e.action {
                Action::Add => {
                    present.insert(e.value);
                }
                Action::Remove => {
                    present.remove(&e.value);
                }
            }
        }
        Ok(present)
    }

    /// `select(key, record)`: present values at the latest known version.
    pub fn select(&self, key: &Text, record: Identifier) -> Result<HashSet<Value>> {
        self.select_key_record(key, record, u64::MAX)
    }

    /// `select(key, record, at_version)`.
    pub fn select_at(&self, key: &Text, record: Identifier, at_version: u64) -> Result<HashSet<Value>> {
        self.select_key_record(key, record, at_version)
    }

    /// `select(record)`: every key with at least one present value.
    pub fn select_record(&self, record: Identifier) -> Result<HashMap<Text, HashSet<Value>>> {
        let composite = Composite::create(&[&record.to_bytes()]);
        let events = self.table_timeline(&composite, u64::MAX)?;
        let mut result: HashMap<Text, HashSet<Value>> = HashMap::new();
        for e in events {
            let entry = result.entry(e.group).or_default();
            match e.action {
                Action::Add => {
                    entry.insert(e.value);
                }
                Action::Remove => {
                    entry.remove(&e.value);
                }
            }
        }
        result.retain(|_, v| !v.is_empty());
        Ok(result)
    }

    /// `chronologize(key, record, [start, end))`: each change point's
    /// resulting present-set, filtering empty intermediate sets.
    pub fn chronologize(
        &self,
        key: &Text,
        record: Identifier,
        start: u64,
        end: u64,
    ) -> Result<Vec<(u64, HashSet<Value>)>> {
        let composite = Composite::create(&[&record.to_bytes(), &key.to_bytes()]);
        let events = self.table_timeline(&composite, u64::MAX)?;
        let mut present = HashSet::new();
        let mut out = Vec::new();
        for e in events {
            match e.action {
                Action::Add => {
                    present.insert(e.value.clone());
                }
                Action::Remove => {
                    present.remove(&e.value);
                }
            }
            if e.version >= start && e.version < end && !present.is_empty() {
                out.push((e.version, present.clone()));
            }
        }
        Ok(out)
    }

    /// `audit(key, record, [start, end))`: human-readable change log.
    pub fn audit(&self, key: &Text, record: Identifier, start: u64, end: u64) -> Result<Vec<(u64, String)>> {
        let composite = Composite::create(&[&record.to_bytes(), &key.to_bytes()]);
        let events = self.table_timeline(&composite, u64::MAX)?;
        Ok(events
            .into_iter()
            .filter(|e| e.version >= start && e.version < end)
            .map(|e| {
                let verb = match e.action {
                    Action::Add => "added",
                    Action::Remove => "removed",
                };
                (e.version, format!("{verb} '{}' as {}", e.value, key))
            })
            .collect())
    }

    /// `find(key, predicate)`: records whose current value for `key`
    /// satisfies `predicate`. Scans every revision stored under `key`
    /// regardless of value (the index chunk's locator is the key text
    /// alone), so ordering predicates are supported without a separate
    /// range index.
    pub fn find(&self, key: &Text, predicate: &crate::lock::Predicate) -> Result<HashSet<Identifier>> {
        let composite = Composite::create(&[&key.to_bytes()]);
        let mut events: Vec<Event<Value>> = Vec::new();
        for seg in self.segments.read().unwrap().iter() {
            for r in seg.index().seek(&composite)? {
                events.push(Event {
                    version: r.version(),
                    group: r.key().clone(),
                    value: Value::Link(*r.value()),
                    action: r.action(),
                });
            }
        }
        for w in self.buffer.snapshot() {
            if w.key == *key {
                events.push(Event {
                    version: w.version,
                    group: w.value.clone(),
                    value: Value::Link(w.locator),
                    action: w.action,
                });
            }
        }
        events.sort_by_key(|e| e.version);

        let mut present: HashMap<Value, HashSet<Identifier>> = HashMap::new();
        for e in events {
            let Value::Link(record) = e.value else { unreachable!() };
            let entry = present.entry(e.group).or_default();
            match e.action {
                Action::Add => {
                    entry.insert(record);
                }
                Action::Remove => {
                    entry.remove(&record);
                }
            }
        }

        Ok(present
            .into_iter()
            .filter(|(v, records)| !records.is_empty() && predicate.covers(v))
            .flat_map(|(_, records)| records)
            .collect())
    }

    /// `search(field, query)`: full-text search over a string field.
    /// `query` is split on whitespace; each word is looked up as an
    /// indexed substring of the field's
    /// corpus and the result is the intersection of per-word record
    /// sets (a record must contain every query word as a substring of
    /// some token). Only covers segments a write has been transferred
    /// into — a pending buffered write has no corpus entries yet, since
    /// corpus fan-out only happens in `Segment::acquire`.
    pub fn search(&self, field: &Text, query: &str) -> Result<HashSet<Identifier>> {
        let words: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
        if words.is_empty() {
            return Ok(HashSet::new());
        }

        let mut per_word: Vec<HashSet<Identifier>> = Vec::with_capacity(words.len());
        for word in &words {
            let composite = Composite::create(&[&field.to_bytes(), &Text::new(word.as_str()).to_bytes()]);
            let mut records = HashSet::new();
            for seg in self.segments.read().unwrap().iter() {
                for r in seg.corpus().seek(&composite)? {
                    records.insert(r.value().record());
                }
            }
            per_word.push(records);
        }

        let mut result = per_word.remove(0);
        for other in per_word {
            result.retain(|r| other.contains(r));
        }
        Ok(result)
    }

    /// `trace(record)`: incoming-link key -> source records, limited to
    /// keys this database has ever written (there is no value-keyed
    /// secondary index, so an unbounded full scan is not on offer).
    pub fn trace(&self, record: Identifier, known_keys: &[Text]) -> Result<HashMap<Text, HashSet<Identifier>>> {
        let mut out = HashMap::new();
        for key in known_keys {
            let sources = self.find(key, &crate::lock::Predicate::Equals(Value::Link(record)))?;
            if !sources.is_empty() {
                out.insert(key.clone(), sources);
            }
        }
        Ok(out)
    }

    /// `navigate(path, record)`: follow `Link` values across records
    /// along a dotted key path, returning every value reached at the
    /// final segment.
    pub fn navigate(&self, path: &str, record: Identifier) -> Result<HashSet<Value>> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut frontier: HashSet<Identifier> = [record].into_iter().collect();
        for (i, segment) in segments.iter().enumerate() {
            let key = Text::new(*segment);
            let last = i == segments.len() - 1;
            if last {
                let mut out = HashSet::new();
                for r in &frontier {
                    out.extend(self.select(&key, *r)?);
                }
                return Ok(out);
            }
            let mut next = HashSet::new();
            for r in &frontier {
                for v in self.select(&key, *r)? {
                    if let Value::Link(target) = v {
                        next.insert(target);
                    }
                }
            }
            frontier = next;
        }
        Ok(HashSet::new())
    }

    // -- Staged batches ---------------------------------------------------

    /// Open a mutation batch. Nested `stage()` calls without an
    /// intervening `commit`/`abort` stack conceptually; only the
    /// outermost `commit` materializes.
    pub fn stage(&self) {
        let depth = self.stage_depth.fetch_add(1, Ordering::AcqRel);
        if depth == 0 {
            *self.stage_mark.lock().unwrap() = Some(self.buffer.mark());
        }
    }

    /// Close a batch. Only the outermost `commit` (depth 1 -> 0)
    /// transfers the accumulated writes.
    pub fn commit(&self) -> Result<()> {
        let prev = self.stage_depth.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            *self.stage_mark.lock().unwrap() = None;
            self.maybe_transfer()?;
            while self.buffer.should_transfer() {
                self.maybe_transfer()?;
            }
        }
        Ok(())
    }

    /// Abandon the outermost batch, discarding every write staged since
    /// the matching `stage()`.
    pub fn abort(&self) {
        self.stage_depth.store(0, Ordering::Release);
        if let Some(mark) = self.stage_mark.lock().unwrap().take() {
            self.buffer.rollback(mark);
        }
    }
}
