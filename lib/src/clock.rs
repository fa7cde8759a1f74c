//! Monotonic clock accessors.
//!
//! All timeouts in the subsystem are deadlines computed from this clock,
//! which resolves through the registered runtime services. Before the host
//! registers its table every accessor returns `0`; the suites register a
//! deterministic fake instead.

use crate::runtime;

/// Monotonic nanoseconds since boot, `0` before the runtime is registered.
#[inline]
pub fn monotonic_ns() -> u64 {
    if !runtime::is_runtime_initialized() {
        return 0;
    }
    runtime::clock_monotonic_ns()
}

/// Monotonic milliseconds since boot.
#[inline]
pub fn uptime_ms() -> u64 {
    monotonic_ns() / 1_000_000
}

/// Absolute deadline `timeout_ms` from now, saturating.
#[inline]
pub fn deadline_ms(timeout_ms: u64) -> u64 {
    uptime_ms().saturating_add(timeout_ms)
}

/// `true` once the monotonic clock has passed `deadline`.
#[inline]
pub fn expired(deadline: u64) -> bool {
    uptime_ms() >= deadline
}
