//! Wall-clock helpers.
//!
//! Timestamps stored on entities are milliseconds since the Unix epoch.
//! Deadlines that must survive wall-clock adjustment use [`std::time::Instant`]
//! instead and never pass through this module.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds in one second.
pub const MS_PER_SEC: u128 = 1_000;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Convert whole seconds to milliseconds.
pub const fn secs_to_ms(secs: u64) -> u128 {
    secs as u128 * MS_PER_SEC
}
