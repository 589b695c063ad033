//! Sequence counter: monotonic, durable, shared across threads.

use std::collections::BTreeSet;
use std::sync::Arc;

use dist_tracker::sequence::SequenceCounter;
use dist_tracker::store::{FileStore, MemoryStore, Store};

#[test]
fn starts_at_one_and_strictly_increases() {
    let counter = SequenceCounter::new(Arc::new(MemoryStore::new()));
    assert_eq!(counter.peek(), 0);

    let values: Vec<u64> = (0..50).map(|_| counter.next()).collect();
    assert_eq!(values[0], 1);
    assert!(values.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(counter.peek(), 50);
}

#[test]
fn continues_from_persisted_value_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    {
        let store: Arc<dyn Store> = Arc::new(FileStore::open(&path).unwrap());
        let counter = SequenceCounter::new(store);
        counter.next();
        counter.next();
        assert_eq!(counter.next(), 3);
    }

    let store: Arc<dyn Store> = Arc::new(FileStore::open(&path).unwrap());
    let counter = SequenceCounter::new(store);
    assert_eq!(counter.next(), 4);
}

#[test]
fn corrupt_stored_value_restarts_at_one() {
    let store = Arc::new(MemoryStore::with_entries([("tracker.sequence_number", "garbage")]));
    let counter = SequenceCounter::new(store);
    assert_eq!(counter.next(), 1);
}

#[test]
fn concurrent_callers_never_share_a_number() {
    let counter = Arc::new(SequenceCounter::new(Arc::new(MemoryStore::new())));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || (0..200).map(|_| counter.next()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = BTreeSet::new();
    for handle in handles {
        for value in handle.join().unwrap() {
            assert!(seen.insert(value), "sequence number {value} issued twice");
        }
    }
    assert_eq!(seen.len(), 1600);
    assert_eq!(seen.iter().next_back(), Some(&1600));
}
