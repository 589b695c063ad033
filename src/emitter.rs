//! Stamping and shipping: sequence number, session metadata, envelope, sink.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::dispatch::EventSink;
use crate::model::PageContext;
use crate::payload::{EventDetail, EventPayloadBuilder, Stamp};
use crate::sequence::SequenceCounter;
use crate::session::SessionContext;
use crate::telemetry::metrics;

/// Shared by every component that produces events.
pub struct Emitter {
    builder: EventPayloadBuilder,
    sequence: SequenceCounter,
    session: SessionContext,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl Emitter {
    pub fn new(
        builder: EventPayloadBuilder,
        sequence: SequenceCounter,
        session: SessionContext,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            builder,
            sequence,
            session,
            sink,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn sequence(&self) -> &SequenceCounter {
        &self.sequence
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Emit with a fresh event id. Returns the id used.
    pub fn emit(&self, page: &PageContext, detail: EventDetail) -> Uuid {
        self.emit_with_id(Uuid::new_v4(), page, detail)
    }

    /// Emit under a caller-owned event id (time-spent correlation).
    ///
    /// Always consumes one sequence number, whatever happens to delivery.
    pub fn emit_with_id(&self, event_id: Uuid, page: &PageContext, detail: EventDetail) -> Uuid {
        let now = self.clock.now();
        let event_type = detail.event_type();

        let session = if event_type.touches_session() {
            self.session.touch(now)
        } else {
            self.session
                .snapshot()
                .unwrap_or_else(|| self.session.touch(now))
        };

        let stamp = Stamp {
            event_id,
            sequence_number: self.sequence.next(),
            timestamp: now,
        };
        let envelope = self.builder.build(stamp, &session, page, detail);

        debug!(
            event_type = %event_type,
            event_id = %event_id,
            sequence_number = stamp.sequence_number,
            url = %page.url,
            "emitting event"
        );
        metrics::events_emitted().add(1, &[KeyValue::new("event_type", event_type.as_str())]);

        self.sink.send(envelope);
        event_id
    }
}
