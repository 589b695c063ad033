//! Span helpers for event delivery.

use tracing::Span;
use uuid::Uuid;

use crate::model::EventType;

/// Start a span covering one ingestion POST.
///
/// `dispatch.result` and `http.status` are filled in by
/// [`record_dispatch_outcome`].
pub fn start_dispatch_span(event_type: EventType, event_id: &Uuid, sequence_number: u64) -> Span {
    tracing::info_span!(
        "event.dispatch",
        "event.type" = event_type.as_str(),
        "event.id" = %event_id,
        "event.sequence" = sequence_number,
        "dispatch.result" = tracing::field::Empty,
        "http.status" = tracing::field::Empty,
    )
}

/// Record how a delivery ended on its span.
pub fn record_dispatch_outcome(span: &Span, result: &str, status: Option<u16>) {
    span.record("dispatch.result", result);
    if let Some(status) = status {
        span.record("http.status", status);
    }
}
