//! Churn gate: debounce window and flush-then-churn ordering.

mod common;

use chrono::Duration;
use dist_tracker::churn::ChurnGate;
use dist_tracker::clock::Clock;
use dist_tracker::heatmap::{HeatmapQueue, WeakHeatmapQueue};
use dist_tracker::model::{EventType, PageContext};
use tokio::runtime::Handle;

#[tokio::test]
async fn triggers_half_a_second_apart_emit_once() {
    let h = common::harness();
    let queue = HeatmapQueue::new(h.emitter.clone());
    let gate = ChurnGate::new(h.emitter.clone(), queue.downgrade(), Handle::current());

    let t0 = h.clock.now();
    let first = gate.trigger_if_due(t0).expect("first trigger wins");
    assert!(gate.trigger_if_due(t0 + Duration::milliseconds(500)).is_none());
    first.await.unwrap();

    assert_eq!(h.sink.of_type(EventType::Churnpoint).len(), 1);
    assert_eq!(gate.last_churn_at_ms(), Some(t0.timestamp_millis()));
}

#[tokio::test]
async fn triggers_past_the_window_emit_twice() {
    let h = common::harness();
    let queue = HeatmapQueue::new(h.emitter.clone());
    let gate = ChurnGate::new(h.emitter.clone(), queue.downgrade(), Handle::current());

    let t0 = h.clock.now();
    gate.trigger_if_due(t0).unwrap().await.unwrap();
    gate.trigger_if_due(t0 + Duration::milliseconds(1500))
        .expect("outside the debounce window")
        .await
        .unwrap();

    assert_eq!(h.sink.of_type(EventType::Churnpoint).len(), 2);
}

#[tokio::test]
async fn dropped_triggers_do_not_extend_the_window() {
    let h = common::harness();
    let queue = HeatmapQueue::new(h.emitter.clone());
    let gate = ChurnGate::new(h.emitter.clone(), queue.downgrade(), Handle::current());

    let t0 = h.clock.now();
    gate.trigger_if_due(t0).unwrap().await.unwrap();
    assert!(gate.trigger_if_due(t0 + Duration::milliseconds(900)).is_none());
    // 1000ms after the first accepted trigger, not after the dropped one.
    assert!(gate.trigger_if_due(t0 + Duration::milliseconds(1000)).is_some());
}

#[tokio::test]
async fn heatmap_flush_is_dispatched_before_churn() {
    let h = common::harness();
    let queue = HeatmapQueue::new(h.emitter.clone());
    queue.set_current_page(PageContext::new("ios://benefits/gym", "Gym"));
    queue.add_click(1, 1);
    queue.add_click(2, 2);

    let gate = ChurnGate::new(h.emitter.clone(), queue.downgrade(), Handle::current());
    gate.trigger_if_due(h.clock.now()).unwrap().await.unwrap();

    let sent = h.sink.envelopes();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].event_type, EventType::Heatmap);
    assert_eq!(sent[1].event_type, EventType::Churnpoint);
    assert_eq!(sent[1].url, "ios://benefits/gym");
    assert!(sent[0].sequence_number < sent[1].sequence_number);
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test]
async fn missing_queue_still_emits_with_empty_page() {
    let h = common::harness();
    let gate = ChurnGate::new(
        h.emitter.clone(),
        WeakHeatmapQueue::default(),
        Handle::current(),
    );
    gate.trigger_if_due(h.clock.now()).unwrap().await.unwrap();

    let churn = h.sink.of_type(EventType::Churnpoint);
    assert_eq!(churn.len(), 1);
    assert_eq!(churn[0].url, "");
    assert_eq!(churn[0].event_data.page.page_id, "");
}

#[tokio::test]
async fn dropped_queue_is_not_kept_alive_by_the_gate() {
    let h = common::harness();
    let queue = HeatmapQueue::new(h.emitter.clone());
    queue.set_current_page(PageContext::new("ios://gone", "Gone"));
    queue.add_click(1, 1);
    let gate = ChurnGate::new(h.emitter.clone(), queue.downgrade(), Handle::current());
    drop(queue);

    gate.trigger_if_due(h.clock.now()).unwrap().await.unwrap();
    let sent = h.sink.envelopes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event_type, EventType::Churnpoint);
}

#[tokio::test]
async fn churn_keeps_the_page_current_at_trigger_time() {
    let h = common::harness();
    let queue = HeatmapQueue::new(h.emitter.clone());
    queue.set_current_page(PageContext::new("ios://a", "A"));
    let gate = ChurnGate::new(h.emitter.clone(), queue.downgrade(), Handle::current());

    let churn = gate.trigger_if_due(h.clock.now()).unwrap();
    queue.set_current_page(PageContext::new("ios://b", "B"));
    churn.await.unwrap();

    let sent = h.sink.of_type(EventType::Churnpoint);
    assert_eq!(sent[0].url, "ios://a");
}
