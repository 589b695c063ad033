//! Device-lifetime session identity and touch metadata.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::store::Store;

const SESSION_ID_KEY: &str = "tracker.session_id";
const FIRST_TOUCH_KEY: &str = "tracker.first_touch_at_ms";
const LAST_TOUCH_KEY: &str = "tracker.last_touch_at_ms";
const TOTAL_VISITS_KEY: &str = "tracker.total_visits";

/// Session metadata as of one touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub first_touch_at: DateTime<Utc>,
    pub last_touch_at: DateTime<Utc>,
    pub total_visits: u64,
}

/// Session state persisted in the device store.
///
/// The session never expires; it lives until the store is wiped.
pub struct SessionContext {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    // Serializes touch() so visit counts are not lost between concurrent emitters.
    lock: Mutex<()>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            lock: Mutex::new(()),
        }
    }

    /// Return the stored session id, creating and persisting one if absent.
    pub fn ensure_session_id(&self) -> String {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_session_id_locked(self.clock.now())
    }

    fn ensure_session_id_locked(&self, now: DateTime<Utc>) -> String {
        match self.store.get(SESSION_ID_KEY) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => warn!("failed to read session id: {e}"),
        }

        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", now.timestamp_millis(), &suffix[..12]);
        if let Err(e) = self.store.set(SESSION_ID_KEY, &id) {
            warn!(session_id = %id, "failed to persist session id: {e}");
        }
        debug!(session_id = %id, "created session");
        id
    }

    /// Record an interaction: sets first touch if unset, moves last touch,
    /// bumps the visit count and persists all three.
    pub fn touch(&self, now: DateTime<Utc>) -> SessionSnapshot {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let session_id = self.ensure_session_id_locked(now);

        let first_touch_ms = self.read_i64(FIRST_TOUCH_KEY).unwrap_or_else(|| {
            self.write(FIRST_TOUCH_KEY, now.timestamp_millis());
            now.timestamp_millis()
        });
        // A clock stepping backwards must not put last touch before first touch.
        let last_touch_ms = now.timestamp_millis().max(first_touch_ms);
        self.write(LAST_TOUCH_KEY, last_touch_ms);

        let total_visits = self
            .read_i64(TOTAL_VISITS_KEY)
            .map(|v| v.max(0) as u64)
            .unwrap_or(0)
            + 1;
        self.write(TOTAL_VISITS_KEY, total_visits as i64);

        SessionSnapshot {
            session_id,
            first_touch_at: from_millis(first_touch_ms),
            last_touch_at: from_millis(last_touch_ms),
            total_visits,
        }
    }

    /// Current metadata without recording a touch. `None` before the first touch.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let session_id = self.store.get(SESSION_ID_KEY).ok().flatten()?;
        Some(SessionSnapshot {
            session_id,
            first_touch_at: from_millis(self.read_i64(FIRST_TOUCH_KEY)?),
            last_touch_at: from_millis(self.read_i64(LAST_TOUCH_KEY)?),
            total_visits: self.read_i64(TOTAL_VISITS_KEY)?.max(0) as u64,
        })
    }

    fn read_i64(&self, key: &str) -> Option<i64> {
        match self.store.get(key) {
            Ok(Some(raw)) => raw.parse().ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(key, "failed to read session field: {e}");
                None
            }
        }
    }

    fn write(&self, key: &str, value: i64) {
        if let Err(e) = self.store.set(key, &value.to_string()) {
            warn!(key, "failed to persist session field: {e}");
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
