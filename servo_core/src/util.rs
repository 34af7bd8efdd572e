//! Common time/period helpers for servo_core.

use std::time::Duration;

/// Number of nanoseconds in one second.
pub const NANOS_PER_SEC: f64 = 1e9;

/// Convert seconds to a `Duration`.
/// - Non-finite or non-positive inputs map to zero.
/// - Values past `Duration::MAX` saturate.
#[inline]
pub fn secs_to_duration(secs: f64) -> Duration {
    if !(secs.is_finite() && secs > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Control period for a requested loop rate.
///
/// `max(1/rate - margin, floor)`: the margin leaves room for tick overhead and
/// the floor keeps a very high rate from starving the other tasks.
#[inline]
pub fn control_interval(rate_hz: f64, margin_ms: f64, floor_ms: f64) -> Duration {
    let period = if rate_hz > 0.0 { 1.0 / rate_hz } else { 0.0 };
    let secs = (period - margin_ms / 1e3).max(floor_ms / 1e3);
    secs_to_duration(secs)
}

/// Nanosecond timestamp to seconds.
#[inline]
pub fn ns_to_secs(ns: u64) -> f64 {
    ns as f64 / NANOS_PER_SEC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_default_rate_hits_the_floor() {
        // 500 Hz leaves nothing after the 2 ms margin
        assert_eq!(
            control_interval(500.0, 2.0, 0.5),
            Duration::from_micros(500)
        );
    }

    #[test]
    fn slow_rate_subtracts_margin() {
        assert_eq!(control_interval(100.0, 2.0, 0.5), Duration::from_millis(8));
    }

    #[test]
    fn nonsense_seconds_become_zero() {
        assert_eq!(secs_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(secs_to_duration(-1.0), Duration::ZERO);
    }
}
