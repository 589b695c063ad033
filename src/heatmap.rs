//! Pointer samples for the current page, flushed in batches.
//!
//! Gesture callbacks only append; the flush swaps the pending list out
//! under the lock and sends the snapshot after releasing it.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::emitter::Emitter;
use crate::model::{HeatmapPoint, PageContext, PointKind};
use crate::payload::EventDetail;
use crate::telemetry::metrics;

/// Minimum spacing between accepted move samples.
pub const MOVE_THROTTLE_MS: i64 = 120;

/// Period of the background flush.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Default)]
struct QueueState {
    page: PageContext,
    last_move_at_ms: Option<i64>,
    pending: Vec<HeatmapPoint>,
}

struct Shared {
    state: Mutex<QueueState>,
    emitter: Arc<Emitter>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().ok().and_then(|t| t.take()) {
            handle.abort();
        }
    }
}

/// Cheaply cloneable handle to one queue.
#[derive(Clone)]
pub struct HeatmapQueue {
    shared: Arc<Shared>,
}

/// Non-owning handle, used by the churn gate.
#[derive(Clone, Default)]
pub struct WeakHeatmapQueue {
    shared: Weak<Shared>,
}

impl WeakHeatmapQueue {
    pub fn upgrade(&self) -> Option<HeatmapQueue> {
        self.shared.upgrade().map(|shared| HeatmapQueue { shared })
    }
}

impl HeatmapQueue {
    pub fn new(emitter: Arc<Emitter>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                emitter,
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakHeatmapQueue {
        WeakHeatmapQueue {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the page context. Pending points are not flushed; they go
    /// out with whatever page is current at the next flush.
    pub fn set_current_page(&self, page: PageContext) {
        self.state().page = page;
    }

    pub fn current_page(&self) -> PageContext {
        self.state().page.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Record a tap. Never throttled.
    pub fn add_click(&self, x: i32, y: i32) {
        let ts = self.shared.emitter.clock().now_ms();
        self.state().pending.push(HeatmapPoint {
            kind: PointKind::Click,
            x,
            y,
            ts,
        });
    }

    /// Record a drag position if at least [`MOVE_THROTTLE_MS`] passed since
    /// the last accepted move. Returns whether the sample was kept.
    pub fn add_move(&self, x: i32, y: i32) -> bool {
        let ts = self.shared.emitter.clock().now_ms();
        let mut state = self.state();
        if let Some(last) = state.last_move_at_ms {
            if ts - last < MOVE_THROTTLE_MS {
                return false;
            }
        }
        state.last_move_at_ms = Some(ts);
        state.pending.push(HeatmapPoint {
            kind: PointKind::Move,
            x,
            y,
            ts,
        });
        true
    }

    /// Swap out the pending points and send them as one heatmap event.
    ///
    /// Returns the number of points sent; an empty queue sends nothing.
    pub fn flush(&self) -> usize {
        let (points, page) = {
            let mut state = self.state();
            if state.pending.is_empty() {
                return 0;
            }
            (std::mem::take(&mut state.pending), state.page.clone())
        };

        let count = points.len();
        self.shared
            .emitter
            .emit(&page, EventDetail::Heatmap { points });
        metrics::heatmap_points_flushed().add(count as u64, &[]);
        debug!(points = count, url = %page.url, "heatmap flushed");
        count
    }

    /// Start flushing every [`FLUSH_INTERVAL`]. No-op if already running.
    ///
    /// Returns `false` if no tokio runtime is available.
    pub fn start_periodic_flush(&self) -> bool {
        let mut timer = self.shared.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.as_ref().is_some_and(|h| !h.is_finished()) {
            return true;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime, heatmap periodic flush not started");
            return false;
        };

        let weak = self.downgrade();
        *timer = Some(runtime.spawn(async move {
            let start = tokio::time::Instant::now() + FLUSH_INTERVAL;
            let mut interval = tokio::time::interval_at(start, FLUSH_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(queue) = weak.upgrade() else {
                    break;
                };
                queue.flush();
            }
        }));
        debug!("heatmap periodic flush started");
        true
    }

    /// Stop the periodic flush, optionally flushing what is left.
    pub fn stop_periodic_flush(&self, flush_remaining: bool) {
        let handle = self
            .shared
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("heatmap periodic flush stopped");
        }
        if flush_remaining {
            self.flush();
        }
    }

    pub fn is_flushing_periodically(&self) -> bool {
        self.shared
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
