//! Monotonic clock reads.

use crate::types::TimeNs;

/// Current monotonic time in nanoseconds. Wait-free, never decreases.
pub fn now_ns() -> TimeNs {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as TimeNs) * 1_000_000_000 + (ts.tv_nsec as TimeNs)
}
