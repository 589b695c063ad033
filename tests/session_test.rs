//! Session context: durable id and touch metadata.

use std::sync::Arc;

use chrono::Duration;
use dist_tracker::clock::{Clock, MockClock};
use dist_tracker::session::SessionContext;
use dist_tracker::store::{FileStore, MemoryStore, Store};

fn session_with(store: Arc<dyn Store>, clock: &MockClock) -> SessionContext {
    SessionContext::new(store, Arc::new(clock.clone()))
}

#[test]
fn session_id_is_created_once() {
    let clock = MockClock::fixed();
    let session = session_with(Arc::new(MemoryStore::new()), &clock);
    let first = session.ensure_session_id();
    assert!(!first.is_empty());
    clock.advance(Duration::seconds(5));
    assert_eq!(session.ensure_session_id(), first);
}

#[test]
fn session_id_is_stamped_from_the_injected_clock() {
    let clock = MockClock::fixed();
    let session = session_with(Arc::new(MemoryStore::new()), &clock);

    let id = session.ensure_session_id();
    let (millis, suffix) = id.split_once('-').unwrap();
    assert_eq!(millis, clock.now_ms().to_string());
    assert_eq!(suffix.len(), 12);
}

#[test]
fn session_id_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.json");
    let clock = MockClock::fixed();

    let id = session_with(Arc::new(FileStore::open(&path).unwrap()), &clock).ensure_session_id();
    clock.advance(Duration::hours(1));
    let reopened = session_with(Arc::new(FileStore::open(&path).unwrap()), &clock);
    assert_eq!(reopened.ensure_session_id(), id);
}

#[test]
fn touch_sets_first_once_and_counts_visits() {
    let clock = MockClock::fixed();
    let session = session_with(Arc::new(MemoryStore::new()), &clock);
    assert!(session.snapshot().is_none());

    let t0 = clock.now();
    let first = session.touch(t0);
    assert_eq!(first.total_visits, 1);
    assert_eq!(first.first_touch_at, t0);
    assert_eq!(first.last_touch_at, t0);

    clock.advance(Duration::seconds(30));
    let second = session.touch(clock.now());
    assert_eq!(second.total_visits, 2);
    assert_eq!(second.first_touch_at, t0);
    assert_eq!(second.last_touch_at, t0 + Duration::seconds(30));
    assert_eq!(second.session_id, first.session_id);

    assert_eq!(session.snapshot(), Some(second));
}

#[test]
fn last_touch_never_precedes_first_touch() {
    let clock = MockClock::fixed();
    let session = session_with(Arc::new(MemoryStore::new()), &clock);

    let t0 = clock.now();
    session.touch(t0);
    let skewed = session.touch(t0 - Duration::seconds(10));
    assert!(skewed.first_touch_at <= skewed.last_touch_at);
    assert_eq!(skewed.last_touch_at, t0);
}
