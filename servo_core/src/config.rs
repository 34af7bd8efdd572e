//! Configuration types for the servo engine.
//!
//! These are the runtime configuration structs used by `Servo`.
//! They are separate from the TOML-deserialized config in `servo_config`.

use std::time::Duration;

/// What the control loop regulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    /// Shaft speed from the lag-window position delta.
    #[default]
    Velocity,
    /// Shaft angle; error is folded to the shortest route.
    Angle,
}

/// Which PID terms are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlLaw {
    P,
    Pi,
    #[default]
    Pid,
}

impl ControlLaw {
    #[inline]
    pub fn uses_integral(self) -> bool {
        matches!(self, ControlLaw::Pi | ControlLaw::Pid)
    }

    #[inline]
    pub fn uses_derivative(self) -> bool {
        matches!(self, ControlLaw::Pid)
    }
}

#[derive(Debug, Clone)]
pub struct ControlCfg {
    pub mode: ControlMode,
    pub law: ControlLaw,
    /// Bound on |integral| in normalized command units; <= 0 disables.
    pub integral_limit: f64,
    pub min_interval_ms: f64,
    pub rate_margin_ms: f64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            mode: ControlMode::Velocity,
            law: ControlLaw::Pid,
            integral_limit: 1.0,
            min_interval_ms: 0.5,
            rate_margin_ms: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationMode {
    #[default]
    Sweep,
    Fixed,
}

/// Bias-finding ramp.
#[derive(Debug, Clone)]
pub struct CalibrationCfg {
    pub mode: CalibrationMode,
    /// Ramp increment per tick, in 1/512 command units.
    pub step: i32,
    /// Displacement (counts) at which the rotor is considered moving.
    pub movement_threshold: i32,
    pub interval: Duration,
    pub max_ticks: u32,
    pub direction: i8,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::Sweep,
            step: 1,
            movement_threshold: 10,
            interval: Duration::from_millis(100),
            max_ticks: 4096,
            direction: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformKind {
    #[default]
    Affine,
    Lookup {
        resolution: u32,
    },
}

#[derive(Debug, Clone)]
pub struct ActuatorCfg {
    pub transform: TransformKind,
    pub init_attempts: u32,
}

impl Default for ActuatorCfg {
    fn default() -> Self {
        Self {
            transform: TransformKind::Affine,
            init_attempts: 3,
        }
    }
}

/// Sample history and encoder geometry.
#[derive(Debug, Clone)]
pub struct BufferCfg {
    pub capacity: usize,
    pub sample_offset: usize,
    pub counts_per_rev: u32,
}

impl Default for BufferCfg {
    fn default() -> Self {
        Self {
            capacity: 1000,
            sample_offset: 2,
            counts_per_rev: 2000,
        }
    }
}
