//! Finite-difference velocity and angle from the sample history.

use std::f64::consts::TAU;

use crate::error::ServoError;
use crate::samples::SampleBuffer;
use crate::util::NANOS_PER_SEC;

/// Largest `f64` strictly below 180.
const BELOW_180: f64 = f64::from_bits(180.0f64.to_bits() - 1);

/// Fold an angle in degrees into `[-180, 180)`.
///
/// Branch-free on the hot path; the final clamp only absorbs floating-point
/// rounding at the interval edges.
#[inline]
pub fn fold_degrees(v: f64) -> f64 {
    (v - 360.0 * ((v + 180.0) / 360.0).floor()).clamp(-180.0, BELOW_180)
}

#[derive(Debug, Clone, Copy)]
pub struct VelocityEstimator {
    lag: usize,
    counts_per_rev: u32,
}

impl VelocityEstimator {
    pub fn new(lag: usize, counts_per_rev: u32) -> Self {
        Self {
            lag: lag.max(1),
            counts_per_rev: counts_per_rev.max(1),
        }
    }

    pub fn lag(&self) -> usize {
        self.lag
    }

    pub fn counts_per_rev(&self) -> u32 {
        self.counts_per_rev
    }

    /// Encoder counts per radian.
    #[inline]
    pub fn counts_per_radian(&self) -> f64 {
        f64::from(self.counts_per_rev) / TAU
    }

    /// Δposition / Δtime over the lag window, in counts per nanosecond.
    pub fn counts_per_ns(&self, buf: &SampleBuffer) -> Result<f64, ServoError> {
        let (dx, dt) = buf.delta(self.lag)?;
        Ok(dx as f64 / dt as f64)
    }

    /// Shaft speed in rad/s over the lag window.
    pub fn rad_per_sec(&self, buf: &SampleBuffer) -> Result<f64, ServoError> {
        Ok(self.counts_per_ns(buf)? * NANOS_PER_SEC / self.counts_per_radian())
    }

    /// Shaft angle for a raw count, folded into `[-180, 180)` degrees.
    #[inline]
    pub fn angle_degrees(&self, position: i32) -> f64 {
        fold_degrees(f64::from(position) * 360.0 / f64::from(self.counts_per_rev))
    }
}
