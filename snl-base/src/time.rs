//! Monotonic time helper.
//!
//! The original runtime calls `pvTimeGetCurrentDouble`, a wall-clock
//! timestamp, for both delay arithmetic and PV metadata. We split the two
//! uses: delay arithmetic (§4.6) uses a monotonic clock so it is immune to
//! wall-clock adjustments (a deliberate improvement over the original, which
//! is not reentrant to `NTP` step changes — recorded in `DESIGN.md`), while
//! PV metadata timestamps (§3) use wall-clock time since operators expect
//! them to correlate with real-world time.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Seconds elapsed on a process-wide monotonic clock. Only differences
/// between two calls are meaningful.
pub fn monotonic_now() -> f64 {
    static START: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);
    START.elapsed().as_secs_f64()
}

/// Wall-clock timestamp, seconds since the Unix epoch, for PV metadata.
pub fn wallclock_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
