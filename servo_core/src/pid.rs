//! PID control law over internal units.
//!
//! Velocity mode works in counts/ns with `dt` in ns; angle mode in degrees
//! with `dt` in ns. Gains arrive already scaled to those units (see
//! `conversions::session_params`).

use tracing::trace;

use crate::config::{ControlLaw, ControlMode};
use crate::velocity::fold_degrees;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Mutable loop state, reset at the start of every session.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidState {
    pub integral: f64,
    pub last_error: f64,
    pub last_sample_time: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PidPhase {
    /// No bias yet; ticks produce no output.
    Idle,
    Active { bias: f64 },
}

/// Breakdown of a single control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidOutput {
    pub error: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    /// `bias + p + i + d`, before the actuator clamps it.
    pub output: f64,
}

#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    law: ControlLaw,
    mode: ControlMode,
    integral_limit: f64,
    target: f64,
    phase: PidPhase,
    state: PidState,
}

impl Pid {
    pub fn new(law: ControlLaw, mode: ControlMode, integral_limit: f64) -> Self {
        Self {
            gains: PidGains::default(),
            law,
            mode,
            integral_limit,
            target: 0.0,
            phase: PidPhase::Idle,
            state: PidState::default(),
        }
    }

    pub fn configure(&mut self, target: f64, gains: PidGains) {
        self.target = target;
        self.gains = gains;
    }

    /// Clear loop state and return to idle.
    pub fn reset(&mut self) {
        self.state = PidState::default();
        self.phase = PidPhase::Idle;
    }

    pub fn activate(&mut self, bias: f64) {
        self.phase = PidPhase::Active { bias };
    }

    pub fn phase(&self) -> PidPhase {
        self.phase
    }

    pub fn bias(&self) -> Option<f64> {
        match self.phase {
            PidPhase::Active { bias } => Some(bias),
            PidPhase::Idle => None,
        }
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Signed error for a measurement; angle errors take the shortest route.
    #[inline]
    pub fn error_for(&self, measured: f64) -> f64 {
        match self.mode {
            ControlMode::Velocity => self.target - measured,
            ControlMode::Angle => fold_degrees(self.target - measured),
        }
    }

    /// One control step. Returns `None` while idle.
    ///
    /// `dt` is the time since the previous tick's sample; I and D contribute
    /// nothing when it is zero (including the first tick of a session).
    pub fn tick(&mut self, measured: f64, sample_time_ns: u64) -> Option<PidOutput> {
        let PidPhase::Active { bias } = self.phase else {
            return None;
        };
        let error = self.error_for(measured);
        let dt = self
            .state
            .last_sample_time
            .map_or(0, |last| sample_time_ns.saturating_sub(last));

        let p = self.gains.kp * error;
        let mut d = 0.0;
        if dt != 0 {
            let dt = dt as f64;
            if self.law.uses_integral() {
                let mut integral = self.state.integral + self.gains.ki * error * dt;
                if self.integral_limit > 0.0 {
                    integral = integral.clamp(-self.integral_limit, self.integral_limit);
                }
                self.state.integral = integral;
            }
            if self.law.uses_derivative() {
                d = self.gains.kd * (error - self.state.last_error) / dt;
            }
        }
        let i = self.state.integral;
        let output = bias + p + i + d;

        self.state.last_error = error;
        self.state.last_sample_time = Some(sample_time_ns);
        trace!(error, p, i, d, output, "pid tick");
        Some(PidOutput {
            error,
            p,
            i,
            d,
            output,
        })
    }
}
