//! Time-on-page measurement under one correlated event id per visit.
//!
//! A visit emits a pageview, then cumulative `timespent` updates every
//! five seconds, then one final update when it ends. All of them carry the
//! same event id so the backend patches a single record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::emitter::Emitter;
use crate::error::{Error, Result};
use crate::model::{PageContext, UpdateReason};
use crate::payload::EventDetail;
use crate::telemetry::metrics;

/// Period of the cumulative time-spent update.
pub const TICK_INTERVAL: Duration = Duration::from_millis(5000);
const TICK_INTERVAL_MS: i64 = 5000;

/// Whole seconds between `start` and `end`, floored, at least 1.
///
/// `None` when no positive time elapsed; such updates are never sent.
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<u64> {
    let ms = (end - start).num_milliseconds();
    if ms <= 0 {
        return None;
    }
    Some(((ms / 1000) as u64).max(1))
}

// ---------------------------------------------------------------------------
// Correlation cache
// ---------------------------------------------------------------------------

/// The event id and start time owned by one visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitCorrelation {
    pub event_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Subject key → live visit correlation.
///
/// Entries survive a tracker being torn down and rebuilt for the same
/// subject; they are removed only when a visit really ends.
#[derive(Debug, Default)]
pub struct CorrelationCache {
    entries: Mutex<HashMap<String, VisitCorrelation>>,
}

impl CorrelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, VisitCorrelation>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<VisitCorrelation> {
        self.entries().get(key).copied()
    }

    /// Existing correlation for `key` (resumed = true) or a new one.
    pub fn get_or_start(&self, key: &str, now: DateTime<Utc>) -> (VisitCorrelation, bool) {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(key) {
            return (*existing, true);
        }
        let correlation = VisitCorrelation {
            event_id: Uuid::new_v4(),
            started_at: now,
        };
        entries.insert(key.to_string(), correlation);
        (correlation, false)
    }

    pub fn clear(&self, key: &str) -> Option<VisitCorrelation> {
        self.entries().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    Idle,
    Active(VisitCorrelation),
    /// Ended by backgrounding; the next foreground starts a new visit.
    Backgrounded,
}

/// Result of a periodic tick that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Update sent with this many cumulative seconds.
    Sent(u64),
    /// Less than one tick interval since the visit started.
    NotDue,
}

struct Inner {
    page: PageContext,
    key: String,
    cache: Arc<CorrelationCache>,
    emitter: Arc<Emitter>,
    runtime: Handle,
    state: Mutex<VisitState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().ok().and_then(|t| t.take()) {
            handle.abort();
        }
    }
}

/// Time-spent tracking for one page subject.
pub struct TimeSpentTracker {
    inner: Arc<Inner>,
}

impl TimeSpentTracker {
    pub fn new(
        page: PageContext,
        cache: Arc<CorrelationCache>,
        emitter: Arc<Emitter>,
        runtime: Handle,
    ) -> Self {
        let key = page.subject_key();
        Self {
            inner: Arc::new(Inner {
                page,
                key,
                cache,
                emitter,
                runtime,
                state: Mutex::new(VisitState::Idle),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn page(&self) -> &PageContext {
        &self.inner.page
    }

    pub fn state(&self) -> VisitState {
        *self.inner.state()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), VisitState::Active(_))
    }

    pub fn current_event_id(&self) -> Option<Uuid> {
        match self.state() {
            VisitState::Active(c) => Some(c.event_id),
            _ => None,
        }
    }

    /// Begin (or resume) the visit and schedule periodic updates.
    ///
    /// A fresh visit emits its pageview under the visit's event id. A visit
    /// resumed from the cache keeps its id and original start time and
    /// does not emit a second pageview. Returns the visit's event id.
    pub fn start_visit(&self, now: DateTime<Utc>) -> Uuid {
        self.inner.start_visit(now)
    }

    /// Periodic update. Reports cumulative seconds since the visit began.
    ///
    /// # Errors
    /// `MissingCorrelation` if there is no active visit or its cache entry
    /// was cleared; the periodic timer is canceled in that case.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        self.inner.tick(now)
    }

    /// End the visit for good: final update, stop the timer, clear the
    /// cached correlation. Returns whether an update was sent.
    pub fn end_visit(&self, reason: UpdateReason, now: DateTime<Utc>) -> bool {
        self.inner.end_visit(reason, now)
    }

    /// App went to the background. Ends the visit with reason `background`.
    pub fn on_background(&self, now: DateTime<Utc>) -> bool {
        self.end_visit(UpdateReason::Background, now)
    }

    /// App came back. Starts a brand-new visit if the last one was ended by
    /// backgrounding; otherwise does nothing.
    pub fn on_foreground(&self, now: DateTime<Utc>) -> Option<Uuid> {
        if self.state() != VisitState::Backgrounded {
            return None;
        }
        Some(self.start_visit(now))
    }

    /// Transient teardown (view recreation). Stops the timer but keeps the
    /// cached correlation so a replacement tracker picks up the same visit.
    pub fn suspend(&self) {
        self.inner.stop_timer();
        *self.inner.state() = VisitState::Idle;
        debug!(subject = %self.inner.key, "time-spent visit suspended");
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, VisitState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start_visit(self: &Arc<Self>, now: DateTime<Utc>) -> Uuid {
        let mut state = self.state();
        if let VisitState::Active(correlation) = *state {
            return correlation.event_id;
        }

        let (correlation, resumed) = self.cache.get_or_start(&self.key, now);
        *state = VisitState::Active(correlation);
        drop(state);

        if resumed {
            debug!(
                subject = %self.key,
                event_id = %correlation.event_id,
                "time-spent visit resumed"
            );
        } else {
            self.emitter
                .emit_with_id(correlation.event_id, &self.page, EventDetail::Pageview);
            info!(
                subject = %self.key,
                event_id = %correlation.event_id,
                "time-spent visit started"
            );
        }

        self.start_timer(correlation.started_at, now);
        correlation.event_id
    }

    fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        // Held through the send so a concurrent end_visit cannot slip its
        // final update in ahead of this one.
        let mut state = self.state();
        let VisitState::Active(correlation) = *state else {
            return Err(self.correlation_lost());
        };
        if self.cache.get(&self.key) != Some(correlation) {
            *state = VisitState::Idle;
            return Err(self.correlation_lost());
        }

        let elapsed_ms = (now - correlation.started_at).num_milliseconds();
        if elapsed_ms < TICK_INTERVAL_MS {
            return Ok(TickOutcome::NotDue);
        }
        Ok(self
            .send_update(correlation, UpdateReason::Periodic, now)
            .map_or(TickOutcome::NotDue, TickOutcome::Sent))
    }

    fn end_visit(&self, reason: UpdateReason, now: DateTime<Utc>) -> bool {
        let sent = {
            let mut state = self.state();
            let previous = std::mem::replace(
                &mut *state,
                if reason == UpdateReason::Background {
                    VisitState::Backgrounded
                } else {
                    VisitState::Idle
                },
            );
            // An idle tracker may still own a suspended visit in the cache.
            let live = match previous {
                VisitState::Active(correlation) => Some(correlation),
                VisitState::Idle => self.cache.get(&self.key),
                VisitState::Backgrounded => None,
            };
            match live {
                Some(correlation) => {
                    self.cache.clear(&self.key);
                    let sent = self.send_update(correlation, reason, now).is_some();
                    info!(
                        subject = %self.key,
                        event_id = %correlation.event_id,
                        reason = %reason,
                        "time-spent visit ended"
                    );
                    sent
                }
                None => false,
            }
        };
        self.stop_timer();
        sent
    }

    /// Emit one time-spent update; `None` if elapsed time is not positive.
    fn send_update(
        &self,
        correlation: VisitCorrelation,
        reason: UpdateReason,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let Some(seconds) = elapsed_seconds(correlation.started_at, now) else {
            debug!(subject = %self.key, %reason, "non-positive elapsed time, update suppressed");
            metrics::time_spent_skipped().add(1, &[KeyValue::new("reason", "non_positive")]);
            return None;
        };
        self.emitter.emit_with_id(
            correlation.event_id,
            &self.page,
            EventDetail::Timespent {
                started_at: correlation.started_at,
                ended_at: now,
                seconds,
                reason,
            },
        );
        Some(seconds)
    }

    fn correlation_lost(&self) -> Error {
        metrics::time_spent_skipped().add(1, &[KeyValue::new("reason", "no_correlation")]);
        Error::MissingCorrelation(self.key.clone())
    }

    /// Ticks are phased to the visit's original start, so a visit resumed
    /// mid-interval gets its next update at the next 5 s boundary of
    /// `started_at`, not 5 s after the resume.
    fn start_timer(self: &Arc<Self>, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let elapsed_ms = (now - started_at).num_milliseconds().max(0);
        let first_in = TICK_INTERVAL_MS - elapsed_ms.rem_euclid(TICK_INTERVAL_MS);
        let weak: Weak<Inner> = Arc::downgrade(self);
        *timer = Some(self.runtime.spawn(async move {
            // Scheduling runs on tokio time while elapsed is measured with
            // the injected clock; the two are assumed to advance together.
            let start = tokio::time::Instant::now() + Duration::from_millis(first_in as u64);
            let mut interval = tokio::time::interval_at(start, TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if !matches!(*inner.state(), VisitState::Active(_)) {
                    break;
                }
                let now = inner.emitter.clock().now();
                if let Err(e) = inner.tick(now) {
                    warn!("time-spent update skipped, stopping timer: {e}");
                    break;
                }
            }
        }));
    }

    fn stop_timer(&self) {
        let handle = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
