//! Cycle-accurate-in-spirit delay primitives for the bus engine.
//!
//! On the original co-processor these were fixed `__delay_cycles()` counts at
//! a known clock rate. Running as an OS thread instead of bare-metal firmware,
//! the engine can't get cycle-exact timing from the scheduler, so pulse widths
//! are reproduced with a spin-wait against a monotonic clock rather than a
//! single sleep call, keeping jitter within a bit-cell the way the timing
//! discipline requires.

use std::time::{Duration, Instant};

/// Busy-wait for approximately `ns` nanoseconds.
pub fn busy_wait_ns(ns: u64) {
    let deadline = Instant::now() + Duration::from_nanos(ns);
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}
