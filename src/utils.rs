//! Small shared helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Used for the cosmetic `created_at`
/// field on orders and trades; the engine's actual ordering guarantees
/// come from the book's internal sequence counters, not from this clock.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as u64
}
