//! Metric instruments for the tracker's own health.
//!
//! Uses the globally-registered `MeterProvider`; with no OTLP endpoint
//! configured these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter(super::SERVICE_NAME)
}

/// Counter: envelopes built and handed to a sink.
/// Labels: `event_type`.
pub fn events_emitted() -> Counter<u64> {
    meter()
        .u64_counter("tracker.events.emitted")
        .with_description("Envelopes built and handed to the sink")
        .build()
}

/// Counter: delivery outcomes.
/// Labels: `event_type`, `result` ("ok" | "http_error" | "transport_error" | "serialize_error").
pub fn dispatch_results() -> Counter<u64> {
    meter()
        .u64_counter("tracker.dispatch.results")
        .with_description("Outcome of each ingestion POST")
        .build()
}

/// Histogram: ingestion POST latency in milliseconds.
/// Labels: `event_type`.
pub fn dispatch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tracker.dispatch.duration_ms")
        .with_description("Ingestion request duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: heatmap points shipped in flushes.
pub fn heatmap_points_flushed() -> Counter<u64> {
    meter()
        .u64_counter("tracker.heatmap.points_flushed")
        .with_description("Heatmap samples delivered in flushes")
        .build()
}

/// Counter: churn triggers dropped by the debounce window.
pub fn churn_suppressed() -> Counter<u64> {
    meter()
        .u64_counter("tracker.churn.suppressed")
        .with_description("Churn triggers dropped inside the debounce window")
        .build()
}

/// Counter: time-spent updates skipped.
/// Labels: `reason` ("non_positive" | "no_correlation").
pub fn time_spent_skipped() -> Counter<u64> {
    meter()
        .u64_counter("tracker.time_spent.skipped")
        .with_description("Time-spent updates that were not sent")
        .build()
}
