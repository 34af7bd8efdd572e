use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock abstraction shared by the scheduler, the sample pipeline
/// and the simulated plant.
///
/// - now(): returns a monotonic Instant
/// - sleep(): suspends for the provided duration (implementations may simulate)
/// - ns_since(): elapsed nanoseconds from an epoch Instant
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Nanoseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ns_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// now() = origin + offset. sleep(d) advances the offset by d without
/// blocking, so a scheduler idling on this clock jumps straight to the
/// next deadline. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_only_on_sleep() {
        let clock = ManualClock::new();
        let epoch = clock.now();
        assert_eq!(clock.ns_since(epoch), 0);
        clock.sleep(Duration::from_millis(3));
        assert_eq!(clock.ns_since(epoch), 3_000_000);
    }

    #[test]
    fn clones_share_a_timeline() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance(Duration::from_micros(250));
        assert_eq!(b.elapsed(), Duration::from_micros(250));
    }

    #[test]
    fn ns_since_saturates_for_future_epoch() {
        let clock = ManualClock::new();
        let future = clock.now() + Duration::from_secs(1);
        assert_eq!(clock.ns_since(future), 0);
    }
}
