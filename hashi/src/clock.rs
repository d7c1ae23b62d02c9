//! Virtual clock kept in step with the host.
//!
//! The frame's idea of "now" is the real clock plus an offset. The host
//! sends its own time in a `Now` message when the session starts and again
//! every `clock.resync_interval_secs`; each sync replaces the offset.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Default)]
pub struct VirtualClock {
    offset_ms: AtomicI64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> DateTime<Utc> {
        let offset = self.offset();
        Utc::now().checked_add_signed(offset).unwrap_or(if offset < Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
    }

    /// Difference between virtual and real time.
    pub fn offset(&self) -> Duration {
        let ms = self.offset_ms.load(Ordering::SeqCst);
        Duration::try_milliseconds(ms).unwrap_or(if ms < 0 {
            Duration::MIN
        } else {
            Duration::MAX
        })
    }

    /// Make `now()` agree with `reference` at this instant.
    pub fn sync_to(&self, reference: DateTime<Utc>) {
        let offset = (reference - Utc::now()).num_milliseconds();
        self.offset_ms.store(offset, Ordering::SeqCst);
        debug!(offset_ms = offset, "Virtual clock synced");
    }

    /// Move virtual time forward (or back, for a negative `by`).
    pub fn advance(&self, by: Duration) {
        let by = by.num_milliseconds();
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .offset_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |ms| {
                Some(ms.saturating_add(by))
            });
    }
}

/// Payload of a `Now` message for `at`.
pub fn now_message(at: DateTime<Utc>) -> Value {
    json!({ "now": at.timestamp_millis() })
}

/// Read the time out of a `Now` message: epoch milliseconds or RFC 3339.
pub fn parse_now(data: &Value) -> Option<DateTime<Utc>> {
    let now = data.get("now")?;
    if let Some(ms) = now.as_i64() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    now.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
