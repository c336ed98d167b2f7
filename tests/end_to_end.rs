//! Integration test: end-to-end kernel scenarios.
//!
//! Exercises the `Database` façade, `ToggleQueue`, and `LockBroker`
//! together rather than unit-testing any one component in isolation.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use concourse_kernel::buffer::ToggleQueue;
use concourse_kernel::config::KernelConfig;
use concourse_kernel::database::Database;
use concourse_kernel::lock::{LockBroker, Predicate, RangeToken};
use concourse_kernel::model::{Identifier, Text, Value};
use concourse_kernel::revision::Action;
use concourse_kernel::segment::Write;

fn small_page_db() -> Database {
    let config = KernelConfig {
        buffer_page_size: 1,
        ..KernelConfig::conservative()
    };
    Database::new(config, 100)
}

#[test]
fn toggle_cancellation_then_fresh_version_queues_one_entry() {
    let queue = ToggleQueue::new(10);
    let locator = Identifier::new(1);
    let key = Text::new("name");
    let value = Value::String(Text::new("jeff"));

    assert!(queue.push(Write::new(Action::Remove, locator, key.clone(), value.clone(), 100)));
    assert!(!queue.push(Write::new(Action::Add, locator, key.clone(), value.clone(), 100)));
    assert_eq!(queue.len(), 0);

    assert!(queue.push(Write::new(Action::Remove, locator, key, value, 101)));
    assert_eq!(queue.len(), 1);
}

#[test]
fn chronologize_shape_matches_spec_scenario() {
    let db = small_page_db();
    let rec = Identifier::new(1);
    let key = Text::new("a");

    db.add(key.clone(), Value::Int64(1), rec).unwrap();
    db.add(key.clone(), Value::Int64(2), rec).unwrap();
    db.add(key.clone(), Value::Int64(3), rec).unwrap();
    db.remove(key.clone(), Value::Int64(2), rec).unwrap();

    let points = db.chronologize(&key, rec, 0, u64::MAX).unwrap();
    let shapes: Vec<usize> = points.iter().map(|(_, set)| set.len()).collect();
    assert_eq!(shapes, vec![1, 2, 3, 2]);

    let last = &points.last().unwrap().1;
    assert!(last.contains(&Value::Int64(1)));
    assert!(last.contains(&Value::Int64(3)));
    assert!(!last.contains(&Value::Int64(2)));
}

#[test]
fn range_lock_between_blocks_interior_write_but_not_exterior() {
    let broker = Arc::new(LockBroker::new());
    let key = Text::new("foo");

    let read_token = RangeToken::for_reading(key.clone(), Predicate::Between(Value::Int64(5), Value::Int64(15)));
    let reader = broker.read_lock(&read_token);

    let interior = RangeToken::for_writing(key.clone(), Value::Int64(10));
    let broker2 = broker.clone();
    let interior2 = interior.clone();
    let blocked = thread::spawn(move || broker2.try_write_lock(&interior2).is_none())
        .join()
        .unwrap();
    assert!(blocked);

    let exterior_high = RangeToken::for_writing(key.clone(), Value::Int64(20));
    let broker3 = broker.clone();
    assert!(thread::spawn(move || broker3.try_write_lock(&exterior_high).is_some())
        .join()
        .unwrap());
    let exterior_low = RangeToken::for_writing(key, Value::Int64(4));
    let broker4 = broker.clone();
    assert!(thread::spawn(move || broker4.try_write_lock(&exterior_low).is_some())
        .join()
        .unwrap());

    drop(reader);
    let broker5 = broker.clone();
    let handle = thread::spawn(move || broker5.try_write_lock(&interior).is_some());
    thread::sleep(Duration::from_millis(10));
    assert!(handle.join().unwrap());
}

#[test]
fn segment_round_trip_select_and_find() {
    let db = small_page_db();
    db.add(Text::new("a"), Value::Int64(1), Identifier::new(1)).unwrap();
    db.add(Text::new("a"), Value::Int64(2), Identifier::new(1)).unwrap();
    db.add(Text::new("b"), Value::String(Text::new("x")), Identifier::new(2)).unwrap();

    let record1 = db.select_record(Identifier::new(1)).unwrap();
    assert_eq!(record1.get(&Text::new("a")).unwrap().len(), 2);

    let record2 = db.select_record(Identifier::new(2)).unwrap();
    assert!(record2
        .get(&Text::new("b"))
        .unwrap()
        .contains(&Value::String(Text::new("x"))));

    let hits = db.find(&Text::new("a"), &Predicate::Equals(Value::Int64(1))).unwrap();
    assert_eq!(hits, [Identifier::new(1)].into_iter().collect());
}

#[test]
fn corpus_search_matches_substrings() {
    let db = small_page_db();
    db.add(
        Text::new("content"),
        Value::String(Text::new("The quick brown fox")),
        Identifier::new(1),
    )
    .unwrap();

    assert_eq!(
        db.search(&Text::new("content"), "quick brown").unwrap(),
        [Identifier::new(1)].into_iter().collect()
    );
    assert_eq!(
        db.search(&Text::new("content"), "quic").unwrap(),
        [Identifier::new(1)].into_iter().collect()
    );
    assert!(db.search(&Text::new("content"), "cat").unwrap().is_empty());
}
