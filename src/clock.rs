//! The single place that reads wall-clock time.
//!
//! Centralizing this behind one function keeps token-expiry and
//! meter-rollover checks trivially swappable for a fixed clock in tests.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as whole seconds since the Unix epoch.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}
