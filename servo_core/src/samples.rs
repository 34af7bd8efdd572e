//! Bounded FIFO of encoder samples.

use std::collections::VecDeque;

use crate::error::ServoError;

/// One encoder reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Accumulated quadrature count.
    pub position: i32,
    /// Monotonic nanoseconds since the servo epoch.
    pub timestamp_ns: u64,
}

/// Fixed-capacity sample history. Pushing at capacity evicts the oldest
/// sample; the buffer never grows past `capacity`.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, position: i32, timestamp_ns: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            position,
            timestamp_ns,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    /// The sample `lag` places behind the newest (`lag = 0` is the newest).
    pub fn lagged(&self, lag: usize) -> Option<Sample> {
        let idx = self.samples.len().checked_sub(lag + 1)?;
        self.samples.get(idx).copied()
    }

    /// Position and time deltas between the newest sample and the one `lag`
    /// places behind it.
    pub fn delta(&self, lag: usize) -> Result<(i64, u64), ServoError> {
        let needed = lag + 1;
        let (Some(new), Some(old)) = (self.latest(), self.lagged(lag)) else {
            return Err(ServoError::InsufficientHistory {
                needed,
                available: self.samples.len(),
            });
        };
        let dt = new.timestamp_ns.saturating_sub(old.timestamp_ns);
        if dt == 0 {
            return Err(ServoError::ZeroInterval);
        }
        let dx = i64::from(new.position) - i64::from(old.position);
        Ok((dx, dt))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Copy of the current history, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }
}
