//! Debounced churn-point emission.
//!
//! A churn point marks the user leaving a page or the app leaving the
//! foreground. The outgoing page's heatmap burst is flushed first so the
//! churn event follows the final interactions.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::emitter::Emitter;
use crate::heatmap::WeakHeatmapQueue;
use crate::payload::EventDetail;
use crate::telemetry::metrics;

/// Minimum spacing between two churn events.
pub const CHURN_DEBOUNCE_MS: i64 = 1000;

pub struct ChurnGate {
    last_churn_at_ms: Mutex<Option<i64>>,
    queue: WeakHeatmapQueue,
    emitter: Arc<Emitter>,
    runtime: Handle,
}

impl ChurnGate {
    /// The gate does not own the queue; if the queue is gone when a churn
    /// is triggered, the event goes out with an empty page context.
    pub fn new(emitter: Arc<Emitter>, queue: WeakHeatmapQueue, runtime: Handle) -> Self {
        Self {
            last_churn_at_ms: Mutex::new(None),
            queue,
            emitter,
            runtime,
        }
    }

    /// Emit a churn point unless one fired less than [`CHURN_DEBOUNCE_MS`] ago.
    ///
    /// The debounce window and the outgoing page are claimed synchronously;
    /// the flush and churn emission run on a spawned task whose handle is
    /// returned. `None` means the trigger was dropped.
    pub fn trigger_if_due(&self, now: DateTime<Utc>) -> Option<JoinHandle<()>> {
        let now_ms = now.timestamp_millis();
        {
            let mut last = self.last_churn_at_ms.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(prev) = *last {
                if now_ms - prev < CHURN_DEBOUNCE_MS {
                    debug!(since_last_ms = now_ms - prev, "churn trigger debounced");
                    metrics::churn_suppressed().add(1, &[]);
                    return None;
                }
            }
            *last = Some(now_ms);
        }

        // The outgoing page is fixed now; a navigation may switch the
        // queue's page before the task runs.
        let page = self
            .queue
            .upgrade()
            .map(|queue| queue.current_page())
            .unwrap_or_default();
        let queue = self.queue.clone();
        let emitter = Arc::clone(&self.emitter);
        Some(self.runtime.spawn(async move {
            if let Some(queue) = queue.upgrade() {
                queue.flush();
            }
            let event_id = emitter.emit(&page, EventDetail::Churnpoint);
            debug!(event_id = %event_id, url = %page.url, "churn point emitted");
        }))
    }

    pub fn last_churn_at_ms(&self) -> Option<i64> {
        *self.last_churn_at_ms.lock().unwrap_or_else(|e| e.into_inner())
    }
}
