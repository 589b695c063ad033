//! Delivery of built envelopes.
//!
//! At-most-once: one POST per envelope, no retry, no persistence. A failed
//! send is logged and the event is gone; the sequence number it consumed is
//! not reused.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::runtime::Handle;
use tracing::{Instrument, debug, error, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{EventEnvelope, EventType};
use crate::telemetry::dispatch::{record_dispatch_outcome, start_dispatch_span};
use crate::telemetry::metrics;

/// Per-request timeout for ingestion POSTs.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the SDK id alongside the `sdkId` query parameter.
pub const SDK_ID_HEADER: &str = "X-SDK-ID";

/// Where built envelopes go. `send` must return without waiting on I/O.
pub trait EventSink: Send + Sync {
    fn send(&self, envelope: EventEnvelope);
}

// ---------------------------------------------------------------------------
// HTTP dispatcher
// ---------------------------------------------------------------------------

/// Posts envelopes to the ingestion API, one spawned task per envelope.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    endpoint: Url,
    sdk_id: String,
    runtime: Handle,
}

impl Dispatcher {
    /// Build a dispatcher bound to the current tokio runtime.
    ///
    /// # Errors
    /// Fails outside a runtime, or if the ingestion URL or HTTP client
    /// cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("dispatcher needs a tokio runtime: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("dist-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.ingestion_url()?,
            sdk_id: config.sdk_id.clone(),
            runtime,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST one envelope and wait for the status.
    pub async fn deliver(&self, envelope: &EventEnvelope) -> Result<()> {
        let body = serde_json::to_vec(envelope)?;
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(SDK_ID_HEADER, self.sdk_id.as_str())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        warn!(
            status = status.as_u16(),
            body = %truncate(&detail, 256),
            "ingestion rejected event"
        );
        Err(Error::Status {
            status: status.as_u16(),
        })
    }

    /// Deliver, then log and count the outcome. Never fails.
    async fn deliver_logged(&self, envelope: EventEnvelope) {
        let event_type = envelope.event_type;
        let span = start_dispatch_span(event_type, &envelope.event_id, envelope.sequence_number);
        let start = Instant::now();

        let result = self.deliver(&envelope).instrument(span.clone()).await;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::dispatch_duration_ms()
            .record(elapsed_ms, &[KeyValue::new("event_type", event_type.as_str())]);

        let outcome = span.in_scope(|| match &result {
            Ok(()) => {
                debug!(duration_ms = elapsed_ms as u64, "event delivered");
                record_dispatch_outcome(&span, "ok", None);
                "ok"
            }
            Err(Error::Status { status }) => {
                record_dispatch_outcome(&span, "http_error", Some(*status));
                "http_error"
            }
            Err(Error::Serialization(e)) => {
                error!("dropping event that failed to serialize: {e}");
                record_dispatch_outcome(&span, "serialize_error", None);
                "serialize_error"
            }
            Err(e) => {
                warn!("dropping event after transport failure: {e}");
                record_dispatch_outcome(&span, "transport_error", None);
                "transport_error"
            }
        });
        metrics::dispatch_results().add(
            1,
            &[
                KeyValue::new("event_type", event_type.as_str()),
                KeyValue::new("result", outcome),
            ],
        );
    }
}

impl EventSink for Dispatcher {
    fn send(&self, envelope: EventEnvelope) {
        let dispatcher = self.clone();
        self.runtime.spawn(async move {
            dispatcher.deliver_logged(envelope).await;
        });
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Records envelopes instead of sending them. For tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    envelopes: Mutex<Vec<EventEnvelope>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in send order.
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<EventEnvelope> {
        self.envelopes()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Drain the recorded envelopes.
    pub fn take(&self) -> Vec<EventEnvelope> {
        std::mem::take(&mut *self.envelopes.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.envelopes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn send(&self, envelope: EventEnvelope) {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope);
    }
}
