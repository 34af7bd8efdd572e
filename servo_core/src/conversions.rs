//! `From` implementations bridging `servo_config` types to `servo_core` types,
//! plus the host-unit to internal-unit conversion for a session.

use std::f64::consts::TAU;
use std::time::Duration;

use servo_config::HostSettings;

use crate::calibration::RAMP_LIMIT;
use crate::config::{
    ActuatorCfg, BufferCfg, CalibrationCfg, CalibrationMode, ControlCfg, ControlLaw, ControlMode,
    TransformKind,
};
use crate::error::ServoError;
use crate::pid::PidGains;
use crate::util::{NANOS_PER_SEC, control_interval, secs_to_duration};

// ── Enums ────────────────────────────────────────────────────────────────────

impl From<servo_config::ControlMode> for ControlMode {
    fn from(m: servo_config::ControlMode) -> Self {
        match m {
            servo_config::ControlMode::Velocity => ControlMode::Velocity,
            servo_config::ControlMode::Angle => ControlMode::Angle,
        }
    }
}

impl From<servo_config::ControlLaw> for ControlLaw {
    fn from(l: servo_config::ControlLaw) -> Self {
        match l {
            servo_config::ControlLaw::P => ControlLaw::P,
            servo_config::ControlLaw::Pi => ControlLaw::Pi,
            servo_config::ControlLaw::Pid => ControlLaw::Pid,
        }
    }
}

impl From<servo_config::CalibrationMode> for CalibrationMode {
    fn from(m: servo_config::CalibrationMode) -> Self {
        match m {
            servo_config::CalibrationMode::Sweep => CalibrationMode::Sweep,
            servo_config::CalibrationMode::Fixed => CalibrationMode::Fixed,
        }
    }
}

// ── Sections ─────────────────────────────────────────────────────────────────

impl From<&servo_config::ControlCfg> for ControlCfg {
    fn from(c: &servo_config::ControlCfg) -> Self {
        Self {
            mode: c.mode.into(),
            law: c.law.into(),
            integral_limit: c.integral_limit,
            min_interval_ms: c.min_interval_ms,
            rate_margin_ms: c.rate_margin_ms,
        }
    }
}

impl From<&servo_config::CalibrationCfg> for CalibrationCfg {
    fn from(c: &servo_config::CalibrationCfg) -> Self {
        Self {
            mode: c.mode.into(),
            step: c.step,
            movement_threshold: c.movement_threshold,
            interval: Duration::from_millis(c.interval_ms),
            max_ticks: c.max_ticks,
            direction: c.direction,
        }
    }
}

impl From<&servo_config::ActuatorCfg> for ActuatorCfg {
    fn from(c: &servo_config::ActuatorCfg) -> Self {
        let transform = match c.transform {
            servo_config::TransformMode::Affine => TransformKind::Affine,
            servo_config::TransformMode::Lookup => TransformKind::Lookup {
                resolution: c.lookup_resolution,
            },
        };
        Self {
            transform,
            init_attempts: c.init_attempts,
        }
    }
}

impl From<&servo_config::Config> for BufferCfg {
    fn from(c: &servo_config::Config) -> Self {
        Self {
            capacity: c.buffer.capacity,
            sample_offset: c.buffer.sample_offset,
            counts_per_rev: c.encoder.counts_per_rev,
        }
    }
}

// ── Host units ───────────────────────────────────────────────────────────────

/// A session's parameters in internal units.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    /// counts/ns in velocity mode, degrees in angle mode.
    pub target: f64,
    pub gains: PidGains,
    /// Normalized bias, used as-is in fixed calibration mode.
    pub bias: f64,
    pub interval: Duration,
    pub time_limit: Duration,
    /// The host-unit settings these were derived from.
    pub host: HostSettings,
}

/// Scale factors between host units and internal units for one mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostUnits {
    mode: ControlMode,
    counts_per_radian: f64,
}

impl HostUnits {
    pub fn new(mode: ControlMode, counts_per_rev: u32) -> Self {
        Self {
            mode,
            counts_per_radian: f64::from(counts_per_rev.max(1)) / TAU,
        }
    }

    /// Host target to internal target.
    pub fn target_in(&self, target: f64) -> f64 {
        match self.mode {
            ControlMode::Velocity => target * self.counts_per_radian / NANOS_PER_SEC,
            ControlMode::Angle => target,
        }
    }

    /// Internal error (or measurement) back to host units.
    pub fn to_host(&self, internal: f64) -> f64 {
        match self.mode {
            ControlMode::Velocity => internal * NANOS_PER_SEC / self.counts_per_radian,
            ControlMode::Angle => internal,
        }
    }

    pub fn gains_in(&self, kp: f64, ki: f64, kd: f64) -> PidGains {
        match self.mode {
            ControlMode::Velocity => {
                let cf = self.counts_per_radian;
                PidGains {
                    kp: kp * cf * NANOS_PER_SEC,
                    ki: ki * cf,
                    kd: kd * cf * NANOS_PER_SEC * NANOS_PER_SEC,
                }
            }
            ControlMode::Angle => PidGains {
                kp,
                ki: ki / NANOS_PER_SEC,
                kd: kd * NANOS_PER_SEC,
            },
        }
    }
}

/// Validate merged host settings and convert them to internal units.
pub fn session_params(
    host: &HostSettings,
    control: &ControlCfg,
    counts_per_rev: u32,
) -> Result<SessionParams, ServoError> {
    host.check()
        .map_err(|e| ServoError::MalformedCommand(e.to_string()))?;
    let units = HostUnits::new(control.mode, counts_per_rev);
    let interval = control_interval(host.rate, control.rate_margin_ms, control.min_interval_ms);
    let time_limit = secs_to_duration(host.time_limit);
    if interval.is_zero() || time_limit.is_zero() {
        return Err(ServoError::Config(
            "control interval and time limit must be > 0".into(),
        ));
    }
    Ok(SessionParams {
        target: units.target_in(host.target),
        gains: units.gains_in(host.kp, host.ki, host.kd),
        bias: host.bias / f64::from(RAMP_LIMIT),
        interval,
        time_limit,
        host: *host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1e-300)
    }

    #[test]
    fn host_defaults_convert_to_loop_gains() {
        let p = session_params(&HostSettings::default(), &ControlCfg::default(), 2000).unwrap();
        let cf = 2000.0 / TAU;
        assert!(close(p.target, 10.0 * cf / 1e9));
        assert!(close(p.gains.kp, 9.42e-8 * cf * 1e9));
        assert!(close(p.gains.ki, 1.256e-6 * cf));
        assert!(close(p.gains.kd, 3.14e-11 * cf * 1e18));
        assert_eq!(p.interval, Duration::from_micros(500));
        assert_eq!(p.time_limit, Duration::from_secs(1));
        assert_eq!(p.bias, 0.0);
    }

    #[test]
    fn raw_bias_is_normalized() {
        let host = HostSettings {
            bias: 256.0,
            ..HostSettings::default()
        };
        let p = session_params(&host, &ControlCfg::default(), 2000).unwrap();
        assert_eq!(p.bias, 0.5);
    }

    #[test]
    fn error_round_trips_through_host_units() {
        let units = HostUnits::new(ControlMode::Velocity, 2000);
        let internal = units.target_in(3.5);
        assert!(close(units.to_host(internal), 3.5));
    }

    #[test]
    fn invalid_rate_is_malformed() {
        let host = HostSettings {
            rate: -5.0,
            ..HostSettings::default()
        };
        assert!(matches!(
            session_params(&host, &ControlCfg::default(), 2000),
            Err(ServoError::MalformedCommand(_))
        ));
    }
}
