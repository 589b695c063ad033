//! Install-lifetime sequence counter shared by every event type.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::store::Store;

const SEQUENCE_KEY: &str = "tracker.sequence_number";

/// Monotonic counter persisted in the device store.
///
/// The lock is held across the whole read-modify-write so concurrent
/// emitters in one process never observe the same number.
pub struct SequenceCounter {
    store: Arc<dyn Store>,
    // Lazily loaded from the store on first use.
    current: Mutex<Option<u64>>,
}

impl SequenceCounter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            current: Mutex::new(None),
        }
    }

    /// Increment, persist and return the next sequence number.
    ///
    /// Starts at 1 on a fresh install. A failed persist is logged and the
    /// in-memory value keeps advancing.
    pub fn next(&self) -> u64 {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let value = current.unwrap_or_else(|| self.load()) + 1;
        *current = Some(value);

        if let Err(e) = self.store.set(SEQUENCE_KEY, &value.to_string()) {
            warn!(sequence_number = value, "failed to persist sequence number: {e}");
        }
        value
    }

    /// Last issued value without consuming one.
    pub fn peek(&self) -> u64 {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        current.unwrap_or_else(|| self.load())
    }

    fn load(&self) -> u64 {
        match self.store.get(SEQUENCE_KEY) {
            Ok(Some(raw)) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "corrupt stored sequence number, restarting at 0");
                0
            }),
            Ok(None) => 0,
            Err(e) => {
                warn!("failed to read sequence number: {e}");
                0
            }
        }
    }
}
