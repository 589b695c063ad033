//! Time-spent visits: correlation, cumulative ticks, boundaries.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use dist_tracker::Error;
use dist_tracker::clock::Clock;
use dist_tracker::model::{Benefit, EventType, PageContext, UpdateReason};
use dist_tracker::time_spent::{
    CorrelationCache, TICK_INTERVAL, TickOutcome, TimeSpentTracker, VisitState,
};
use tokio::runtime::Handle;

fn benefit_page() -> PageContext {
    PageContext::new("ios://benefits/gym", "Gym Membership").with_benefit(Benefit {
        id: "ben-7".to_string(),
        name: "Gym Membership".to_string(),
        category: Some("wellness".to_string()),
    })
}

fn tracker(h: &common::Harness, cache: &Arc<CorrelationCache>) -> TimeSpentTracker {
    TimeSpentTracker::new(
        benefit_page(),
        Arc::clone(cache),
        h.emitter.clone(),
        Handle::current(),
    )
}

#[tokio::test]
async fn one_event_id_across_pageview_ticks_and_exit() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());
    let visit = tracker(&h, &cache);

    let t0 = h.clock.now();
    let event_id = visit.start_visit(t0);
    for secs in [5, 10, 15] {
        let outcome = visit.tick(t0 + Duration::seconds(secs)).unwrap();
        assert_eq!(outcome, TickOutcome::Sent(secs as u64));
    }
    assert!(visit.end_visit(UpdateReason::Exit, t0 + Duration::milliseconds(17_400)));

    let sent = h.sink.envelopes();
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[0].event_type, EventType::Pageview);
    assert!(sent.iter().all(|e| e.event_id == event_id));

    let updates: Vec<_> = sent[1..]
        .iter()
        .map(|e| {
            assert_eq!(e.event_type, EventType::Timespent);
            let info = e.event_data.time_spent.as_ref().unwrap();
            assert_eq!(e.event_data.session_metadata.total_time_spent, Some(info.duration_seconds));
            (info.reason, info.duration_seconds)
        })
        .collect();
    assert_eq!(
        updates,
        vec![
            (UpdateReason::Periodic, 5),
            (UpdateReason::Periodic, 10),
            (UpdateReason::Periodic, 15),
            (UpdateReason::Exit, 17),
        ]
    );

    // Every envelope consumed its own sequence number.
    assert!(sent.windows(2).all(|w| w[0].sequence_number < w[1].sequence_number));
    assert!(cache.is_empty());
    assert_eq!(visit.state(), VisitState::Idle);
}

#[tokio::test]
async fn tick_before_first_interval_is_not_due() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());
    let visit = tracker(&h, &cache);

    let t0 = h.clock.now();
    visit.start_visit(t0);
    assert_eq!(
        visit.tick(t0 + Duration::milliseconds(4999)).unwrap(),
        TickOutcome::NotDue
    );
    assert_eq!(h.sink.of_type(EventType::Timespent).len(), 0);
}

#[tokio::test]
async fn background_then_foreground_starts_a_new_visit() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());
    let visit = tracker(&h, &cache);

    let t0 = h.clock.now();
    let first_id = visit.start_visit(t0);
    assert!(visit.on_background(t0 + Duration::seconds(8)));
    assert_eq!(visit.state(), VisitState::Backgrounded);

    let second_id = visit
        .on_foreground(t0 + Duration::seconds(60))
        .expect("backgrounded visit restarts");
    assert_ne!(first_id, second_id);

    let timespent = h.sink.of_type(EventType::Timespent);
    assert_eq!(timespent.len(), 1);
    let info = timespent[0].event_data.time_spent.as_ref().unwrap();
    assert_eq!(info.reason, UpdateReason::Background);
    assert_eq!(info.duration_seconds, 8);
    assert_eq!(timespent[0].event_id, first_id);

    // New visit: fresh pageview, elapsed measured from the new start.
    let pageviews = h.sink.of_type(EventType::Pageview);
    assert_eq!(pageviews.len(), 2);
    assert_eq!(pageviews[1].event_id, second_id);
    assert_eq!(
        visit.tick(t0 + Duration::seconds(66)).unwrap(),
        TickOutcome::Sent(6)
    );
}

#[tokio::test]
async fn foreground_without_background_is_ignored() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());
    let visit = tracker(&h, &cache);

    let t0 = h.clock.now();
    let id = visit.start_visit(t0);
    assert!(visit.on_foreground(t0 + Duration::seconds(1)).is_none());
    assert_eq!(visit.current_event_id(), Some(id));
}

#[tokio::test]
async fn zero_length_visit_sends_no_update() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());
    let visit = tracker(&h, &cache);

    let t0 = h.clock.now();
    visit.start_visit(t0);
    assert!(!visit.end_visit(UpdateReason::Navigate, t0));
    assert_eq!(h.sink.of_type(EventType::Timespent).len(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn short_visit_reports_one_second() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());
    let visit = tracker(&h, &cache);

    let t0 = h.clock.now();
    visit.start_visit(t0);
    visit.end_visit(UpdateReason::Navigate, t0 + Duration::milliseconds(400));

    let timespent = h.sink.of_type(EventType::Timespent);
    assert_eq!(timespent[0].event_data.session_metadata.total_time_spent, Some(1));
}

#[tokio::test]
async fn tick_without_visit_is_a_correlation_error() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());
    let visit = tracker(&h, &cache);

    let err = visit.tick(h.clock.now()).unwrap_err();
    assert!(matches!(err, Error::MissingCorrelation(_)));

    // Cleared out from under an active visit.
    let t0 = h.clock.now();
    visit.start_visit(t0);
    cache.clear(&benefit_page().subject_key());
    let err = visit.tick(t0 + Duration::seconds(5)).unwrap_err();
    assert!(matches!(err, Error::MissingCorrelation(_)));
    assert!(!visit.is_active());
    assert_eq!(h.sink.of_type(EventType::Timespent).len(), 0);
}

#[tokio::test]
async fn recreated_tracker_resumes_the_same_visit() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());

    let t0 = h.clock.now();
    let original = tracker(&h, &cache);
    let id = original.start_visit(t0);
    original.suspend();
    drop(original);

    let replacement = tracker(&h, &cache);
    assert_eq!(replacement.start_visit(t0 + Duration::seconds(2)), id);
    assert_eq!(
        replacement.tick(t0 + Duration::seconds(6)).unwrap(),
        TickOutcome::Sent(6),
        "elapsed keeps counting from the original start"
    );
    assert_eq!(h.sink.of_type(EventType::Pageview).len(), 1);
}

#[tokio::test]
async fn ending_an_idle_tracker_closes_a_suspended_visit() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());

    let t0 = h.clock.now();
    let visit = tracker(&h, &cache);
    let id = visit.start_visit(t0);
    visit.suspend();

    assert!(visit.end_visit(UpdateReason::Navigate, t0 + Duration::seconds(3)));
    let timespent = h.sink.of_type(EventType::Timespent);
    assert_eq!(timespent.len(), 1);
    assert_eq!(timespent[0].event_id, id);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn periodic_timer_sends_cumulative_updates() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());
    let visit = tracker(&h, &cache);

    let id = visit.start_visit(h.clock.now());
    for _ in 0..3 {
        h.clock.advance_ms(5000);
        tokio::time::sleep(TICK_INTERVAL + StdDuration::from_millis(1)).await;
    }

    let timespent = h.sink.of_type(EventType::Timespent);
    let seconds: Vec<_> = timespent
        .iter()
        .map(|e| e.event_data.session_metadata.total_time_spent.unwrap())
        .collect();
    assert_eq!(seconds, vec![5, 10, 15]);
    assert!(timespent.iter().all(|e| e.event_id == id));

    visit.end_visit(UpdateReason::Exit, h.clock.now());
    h.clock.advance_ms(5000);
    tokio::time::sleep(TICK_INTERVAL * 2).await;
    assert_eq!(h.sink.of_type(EventType::Timespent).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn resumed_visit_ticks_on_the_original_schedule() {
    let h = common::harness();
    let cache = Arc::new(CorrelationCache::new());

    let original = tracker(&h, &cache);
    let id = original.start_visit(h.clock.now());
    original.suspend();
    drop(original);

    h.clock.advance_ms(2_000);
    let replacement = tracker(&h, &cache);
    assert_eq!(replacement.start_visit(h.clock.now()), id);

    // Next boundary is 5 s after the original start, 3 s from now.
    h.clock.advance_ms(3_000);
    tokio::time::sleep(StdDuration::from_millis(3_001)).await;

    let timespent = h.sink.of_type(EventType::Timespent);
    assert_eq!(timespent.len(), 1);
    assert_eq!(timespent[0].event_id, id);
    assert_eq!(timespent[0].event_data.session_metadata.total_time_spent, Some(5));
}
