//! The tracker service: one explicitly constructed instance per process,
//! wiring the counter, session, heatmap queue, churn gate and time-spent
//! visits together behind the calls the host UI makes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::churn::ChurnGate;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatch::{Dispatcher, EventSink};
use crate::emitter::Emitter;
use crate::error::{Error, Result};
use crate::heatmap::HeatmapQueue;
use crate::model::{DeviceContext, ElementInfo, PageContext, UpdateReason};
use crate::payload::{EventDetail, EventPayloadBuilder};
use crate::sequence::SequenceCounter;
use crate::session::SessionContext;
use crate::store::Store;
use crate::time_spent::{CorrelationCache, TimeSpentTracker};

pub struct Tracker {
    emitter: Arc<Emitter>,
    heatmap: HeatmapQueue,
    churn: ChurnGate,
    correlations: Arc<CorrelationCache>,
    visit: Mutex<Option<TimeSpentTracker>>,
    runtime: Handle,
    shut_down: AtomicBool,
}

impl Tracker {
    /// Wire a tracker against an arbitrary sink and clock.
    ///
    /// Must be called inside a tokio runtime; timers and churn tasks are
    /// spawned on it.
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        device: DeviceContext,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("tracker needs a tokio runtime: {e}")))?;

        let emitter = Arc::new(Emitter::new(
            EventPayloadBuilder::new(config.distributor.clone(), device),
            SequenceCounter::new(Arc::clone(&store)),
            SessionContext::new(store, Arc::clone(&clock)),
            sink,
            clock,
        ));
        let heatmap = HeatmapQueue::new(Arc::clone(&emitter));
        let churn = ChurnGate::new(Arc::clone(&emitter), heatmap.downgrade(), runtime.clone());

        info!(distributor = %config.distributor, sdk_id = %config.sdk_id, "tracker initialized");
        Ok(Self {
            emitter,
            heatmap,
            churn,
            correlations: Arc::new(CorrelationCache::new()),
            visit: Mutex::new(None),
            runtime,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Production wiring: HTTP dispatcher and wall clock.
    pub fn with_dispatcher(
        config: &Config,
        store: Arc<dyn Store>,
        device: DeviceContext,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(config)?;
        Self::new(
            config,
            store,
            Arc::new(dispatcher),
            Arc::new(SystemClock),
            device,
        )
    }

    pub fn heatmap(&self) -> &HeatmapQueue {
        &self.heatmap
    }

    pub fn churn(&self) -> &ChurnGate {
        &self.churn
    }

    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    pub fn correlations(&self) -> &Arc<CorrelationCache> {
        &self.correlations
    }

    pub fn current_page(&self) -> PageContext {
        self.heatmap.current_page()
    }

    /// Event id of the visit in progress, if any.
    pub fn current_visit_event_id(&self) -> Option<Uuid> {
        self.visit().as_ref().and_then(|v| v.current_event_id())
    }

    fn visit(&self) -> MutexGuard<'_, Option<TimeSpentTracker>> {
        self.visit.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.emitter.clock().now()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// The user navigated to `page`.
    ///
    /// Any visit on a different subject ends with reason `navigate`.
    /// Pending heatmap points are flushed under the old page before the
    /// switch, then a visit starts (or resumes) on the new page. Returns the
    /// visit's event id, or `None` once the tracker is shut down.
    pub fn enter_page(&self, page: PageContext) -> Option<Uuid> {
        if self.is_shut_down() {
            return None;
        }
        let now = self.now();
        let mut visit = self.visit();

        if let Some(current) = visit.as_ref() {
            if current.page().subject_key() == page.subject_key() && current.is_active() {
                return Some(current.start_visit(now));
            }
        }
        if let Some(previous) = visit.take() {
            previous.end_visit(UpdateReason::Navigate, now);
        }

        self.heatmap.flush();
        self.heatmap.set_current_page(page.clone());
        self.heatmap.start_periodic_flush();

        let tracker = TimeSpentTracker::new(
            page,
            Arc::clone(&self.correlations),
            Arc::clone(&self.emitter),
            self.runtime.clone(),
        );
        let event_id = tracker.start_visit(now);
        *visit = Some(tracker);
        Some(event_id)
    }

    /// The user left the current page for good.
    ///
    /// Returns the churn task handle, or `None` if churn was debounced.
    pub fn leave_page(&self) -> Option<JoinHandle<()>> {
        if self.is_shut_down() {
            return None;
        }
        let now = self.now();
        if let Some(visit) = self.visit().take() {
            visit.end_visit(UpdateReason::Navigate, now);
        }
        self.churn.trigger_if_due(now)
    }

    /// The page's view is being recreated; keep its visit correlation so the
    /// next `enter_page` for the same subject continues it.
    pub fn suspend_visit(&self) {
        if self.is_shut_down() {
            return;
        }
        if let Some(visit) = self.visit().take() {
            visit.suspend();
        }
    }

    /// Standalone pageview with its own event id.
    pub fn track_pageview(&self, page: &PageContext) -> Option<Uuid> {
        if self.is_shut_down() {
            return None;
        }
        Some(self.emitter.emit(page, EventDetail::Pageview))
    }

    /// A tap on `element` at view coordinates `(x, y)`.
    pub fn track_click(&self, element: ElementInfo, x: i32, y: i32) -> Option<Uuid> {
        if self.is_shut_down() {
            return None;
        }
        self.heatmap.add_click(x, y);
        let page = self.heatmap.current_page();
        Some(self.emitter.emit(&page, EventDetail::Click { element }))
    }

    /// A drag position; throttled.
    pub fn record_move(&self, x: i32, y: i32) -> bool {
        !self.is_shut_down() && self.heatmap.add_move(x, y)
    }

    pub fn did_enter_background(&self) -> Option<JoinHandle<()>> {
        if self.is_shut_down() {
            return None;
        }
        let now = self.now();
        if let Some(visit) = self.visit().as_ref() {
            visit.on_background(now);
        }
        self.heatmap.stop_periodic_flush(false);
        self.churn.trigger_if_due(now)
    }

    /// Returns the new visit's event id when a backgrounded visit restarts.
    pub fn will_enter_foreground(&self) -> Option<Uuid> {
        if self.is_shut_down() {
            return None;
        }
        let now = self.now();
        let event_id = self.visit().as_ref().and_then(|v| v.on_foreground(now));
        self.heatmap.start_periodic_flush();
        debug!(?event_id, "foreground resumed");
        event_id
    }

    /// App exit: final time-spent update, last heatmap flush, churn point.
    /// Afterwards every entry point on this tracker is a no-op.
    pub fn shutdown(&self) -> Option<JoinHandle<()>> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return None;
        }
        let now = self.now();
        if let Some(visit) = self.visit().take() {
            visit.end_visit(UpdateReason::Exit, now);
        }
        self.heatmap.stop_periodic_flush(true);
        info!("tracker shut down");
        self.churn.trigger_if_due(now)
    }
}
