//! Bias calibration: ramp the actuator until the rotor starts to move.
//!
//! The command follows a triangle ramp over `[-512, 512]` (in 1/512 units).
//! Displacement is measured from the first reading. Once it reaches the
//! movement threshold the last ramp value becomes the bias.

use tracing::{debug, info};

use crate::config::CalibrationCfg;

/// Full-scale ramp magnitude; commands are `value / RAMP_LIMIT`.
pub const RAMP_LIMIT: i32 = 512;

/// Integer triangle wave between `min` and `max` that reverses on reaching
/// either end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleRamp {
    value: i32,
    step: i32,
    min: i32,
    max: i32,
    direction: i8,
}

impl TriangleRamp {
    pub fn new(min: i32, max: i32, start: i32, step: i32, direction: i8) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            value: start.clamp(min, max),
            step: step.max(1),
            min,
            max,
            direction: if direction < 0 { -1 } else { 1 },
        }
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn direction(&self) -> i8 {
        self.direction
    }

    /// Move one step and return the new value.
    pub fn advance(&mut self) -> i32 {
        let next = self.value + self.step * i32::from(self.direction);
        self.value = next.clamp(self.min, self.max);
        if self.value >= self.max {
            self.direction = -1;
        } else if self.value <= self.min {
            self.direction = 1;
        }
        self.value
    }
}

/// Externally visible calibration state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    pub direction: i8,
    /// Current ramp value in `[-512, 512]`.
    pub command_magnitude: i32,
    pub bias_result: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// Still ramping; send this normalized command.
    Command(f64),
    /// Rotor moved; `bias` is normalized.
    Settled { bias: f64 },
    /// Ramp budget exhausted without movement.
    TimedOut { ticks: u32 },
}

#[derive(Debug, Clone)]
pub struct BiasCalibration {
    initial: TriangleRamp,
    ramp: TriangleRamp,
    threshold: i64,
    max_ticks: u32,
    ticks: u32,
    origin: Option<i32>,
    bias: Option<f64>,
}

impl BiasCalibration {
    pub fn new(cfg: &CalibrationCfg) -> Self {
        let ramp = TriangleRamp::new(-RAMP_LIMIT, RAMP_LIMIT, 0, cfg.step, cfg.direction);
        Self {
            initial: ramp,
            ramp,
            threshold: i64::from(cfg.movement_threshold.max(1)),
            max_ticks: cfg.max_ticks,
            ticks: 0,
            origin: None,
            bias: None,
        }
    }

    pub fn reset(&mut self) {
        self.ramp = self.initial;
        self.ticks = 0;
        self.origin = None;
        self.bias = None;
    }

    pub fn state(&self) -> CalibrationState {
        CalibrationState {
            direction: self.ramp.direction(),
            command_magnitude: self.ramp.value(),
            bias_result: self.bias,
        }
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Feed one encoder reading and get the next action.
    pub fn step(&mut self, position: i32) -> CalibrationStep {
        if let Some(bias) = self.bias {
            return CalibrationStep::Settled { bias };
        }
        let origin = *self.origin.get_or_insert(position);
        let displacement = (i64::from(position) - i64::from(origin)).abs();
        if displacement >= self.threshold {
            let bias = f64::from(self.ramp.value()) / f64::from(RAMP_LIMIT);
            self.bias = Some(bias);
            info!(
                bias,
                raw = self.ramp.value(),
                ticks = self.ticks,
                "calibration settled"
            );
            return CalibrationStep::Settled { bias };
        }
        if self.ticks >= self.max_ticks {
            return CalibrationStep::TimedOut { ticks: self.ticks };
        }
        self.ticks += 1;
        let value = self.ramp.advance();
        debug!(value, displacement, "calibration ramp");
        CalibrationStep::Command(f64::from(value) / f64::from(RAMP_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_reverses_at_limits() {
        let mut r = TriangleRamp::new(-2, 2, 0, 1, 1);
        let seq: Vec<i32> = (0..9).map(|_| r.advance()).collect();
        assert_eq!(seq, vec![1, 2, 1, 0, -1, -2, -1, 0, 1]);
    }

    #[test]
    fn ramp_clamps_oversized_step() {
        let mut r = TriangleRamp::new(0, 10, 8, 5, 1);
        assert_eq!(r.advance(), 10);
        assert_eq!(r.direction(), -1);
    }

    #[test]
    fn still_rotor_times_out() {
        let cfg = CalibrationCfg {
            max_ticks: 3,
            ..CalibrationCfg::default()
        };
        let mut cal = BiasCalibration::new(&cfg);
        for _ in 0..3 {
            assert!(matches!(cal.step(0), CalibrationStep::Command(_)));
        }
        assert_eq!(cal.step(0), CalibrationStep::TimedOut { ticks: 3 });
    }

    #[test]
    fn displacement_is_relative_to_first_reading() {
        let mut cal = BiasCalibration::new(&CalibrationCfg::default());
        assert!(matches!(cal.step(5000), CalibrationStep::Command(_)));
        assert!(matches!(cal.step(5009), CalibrationStep::Command(_)));
        assert_eq!(
            cal.step(4990),
            CalibrationStep::Settled { bias: 2.0 / 512.0 }
        );
    }

    #[test]
    fn negative_direction_ramps_down() {
        let cfg = CalibrationCfg {
            direction: -1,
            ..CalibrationCfg::default()
        };
        let mut cal = BiasCalibration::new(&cfg);
        assert_eq!(cal.step(0), CalibrationStep::Command(-1.0 / 512.0));
        assert_eq!(cal.state().command_magnitude, -1);
    }
}
