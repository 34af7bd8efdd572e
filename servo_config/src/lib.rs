#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the servo controller.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - `host` holds the newline-delimited JSON parameter contract spoken by the
//!   host tooling, with fallback-to-previous merge semantics.
use serde::Deserialize;

pub mod host;

pub use host::{HostParamError, HostParams, HostSettings, parse_host_line};

/// Raspberry Pi wiring; only consulted by the `hardware` backend.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Pins {
    pub spi_bus: u8,
    pub spi_slave_select: u8,
    /// GPIO driving the digipot's active-low SYNC line.
    pub chip_select: u8,
    pub encoder_a: u8,
    pub encoder_b: u8,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EncoderCfg {
    pub counts_per_rev: u32,
}

impl Default for EncoderCfg {
    fn default() -> Self {
        Self {
            counts_per_rev: 2000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BufferCfg {
    /// Maximum retained samples; oldest is evicted first.
    pub capacity: usize,
    /// Lag used by the finite-difference estimator.
    pub sample_offset: usize,
}

impl Default for BufferCfg {
    fn default() -> Self {
        Self {
            capacity: 1000,
            sample_offset: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Regulate shaft speed; `target` is rad/s.
    #[default]
    Velocity,
    /// Regulate shaft angle; `target` is degrees in [-180, 180].
    Angle,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlLaw {
    P,
    Pi,
    #[default]
    Pid,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlCfg {
    pub mode: ControlMode,
    pub law: ControlLaw,
    /// Bound on |integral| in normalized actuator units; <= 0 disables the clamp.
    pub integral_limit: f64,
    /// Floor on the control interval derived from the host `rate`.
    pub min_interval_ms: f64,
    /// Subtracted from the host period to leave room for tick overhead.
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    /// Ramp the actuator until the rotor moves and use that as the bias.
    #[default]
    Sweep,
    /// Skip the sweep; use the host-supplied bias as-is.
    Fixed,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    pub mode: CalibrationMode,
    /// Command increment per tick, in 1/512 units.
    pub step: i32,
    /// Displacement in counts that counts as "moving".
    pub movement_threshold: i32,
    pub interval_ms: u64,
    /// Give up after this many ramp ticks.
    pub max_ticks: u32,
    /// Initial ramp direction, +1 or -1.
    pub direction: i8,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::Sweep,
            step: 1,
            movement_threshold: 10,
            interval_ms: 100,
            max_ticks: 4096,
            direction: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    #[default]
    Affine,
    Lookup,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ActuatorCfg {
    pub transform: TransformMode,
    /// Number of table steps across [-1, 1] in lookup mode.
    pub lookup_resolution: u32,
    pub init_attempts: u32,
    pub clock_hz: u32,
}

impl Default for ActuatorCfg {
    fn default() -> Self {
        Self {
            transform: TransformMode::Affine,
            lookup_resolution: 2000,
            init_attempts: 3,
            clock_hz: 1_000_000,
        }
    }
}

/// Host settings in effect before the first host line arrives.
/// Units follow the host protocol (rad/s, s, Hz, raw pot units).
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SessionDefaults {
    pub target: f64,
    pub time_limit: f64,
    pub rate: f64,
    pub bias: f64,
    #[serde(alias = "Kp")]
    pub kp: f64,
    #[serde(alias = "Ki")]
    pub ki: f64,
    #[serde(alias = "Kd")]
    pub kd: f64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            target: 10.0,
            time_limit: 1.0,
            rate: 500.0,
            bias: 0.0,
            kp: 9.42e-8,
            ki: 1.256e-6,
            kd: 3.14e-11,
        }
    }
}

/// Parameters of the simulated plant used when no hardware backend is built.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimCfg {
    pub deadzone: f64,
    pub max_rad_s: f64,
    /// Pace the simulation with the wall clock. When false, simulated time
    /// jumps straight to each deadline and a session finishes instantly.
    pub realtime: bool,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            deadzone: 0.1,
            max_rad_s: 60.0,
            realtime: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeCfg {
    /// Request SCHED_FIFO + mlockall for the control loop.
    pub rt: bool,
    pub rt_priority: Option<i32>,
    pub rt_cpu: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pins: Option<Pins>,
    #[serde(default)]
    pub encoder: EncoderCfg,
    #[serde(default)]
    pub buffer: BufferCfg,
    #[serde(default)]
    pub control: ControlCfg,
    #[serde(default)]
    pub calibration: CalibrationCfg,
    #[serde(default)]
    pub actuator: ActuatorCfg,
    #[serde(default)]
    pub session: SessionDefaults,
    #[serde(default)]
    pub sim: SimCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub runtime: RuntimeCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Encoder / buffer
        if self.encoder.counts_per_rev == 0 {
            eyre::bail!("encoder.counts_per_rev must be > 0");
        }
        if self.buffer.sample_offset == 0 {
            eyre::bail!("buffer.sample_offset must be >= 1");
        }
        if self.buffer.capacity <= self.buffer.sample_offset {
            eyre::bail!("buffer.capacity must exceed buffer.sample_offset");
        }

        // Control
        if !self.control.integral_limit.is_finite() {
            eyre::bail!("control.integral_limit must be finite");
        }
        if !(self.control.min_interval_ms.is_finite() && self.control.min_interval_ms > 0.0) {
            eyre::bail!("control.min_interval_ms must be > 0");
        }
        if !(self.control.rate_margin_ms.is_finite() && self.control.rate_margin_ms >= 0.0) {
            eyre::bail!("control.rate_margin_ms must be >= 0");
        }

        // Calibration
        if !(1..=512).contains(&self.calibration.step) {
            eyre::bail!("calibration.step must be in [1, 512]");
        }
        if self.calibration.movement_threshold <= 0 {
            eyre::bail!("calibration.movement_threshold must be > 0");
        }
        if self.calibration.interval_ms == 0 {
            eyre::bail!("calibration.interval_ms must be >= 1");
        }
        if self.calibration.max_ticks == 0 {
            eyre::bail!("calibration.max_ticks must be >= 1");
        }
        if !matches!(self.calibration.direction, 1 | -1) {
            eyre::bail!("calibration.direction must be 1 or -1");
        }

        // Actuator
        if self.actuator.init_attempts == 0 {
            eyre::bail!("actuator.init_attempts must be >= 1");
        }
        if self.actuator.transform == TransformMode::Lookup && self.actuator.lookup_resolution < 2
        {
            eyre::bail!("actuator.lookup_resolution must be >= 2 in lookup mode");
        }
        if self.actuator.clock_hz == 0 {
            eyre::bail!("actuator.clock_hz must be > 0");
        }

        // Session defaults go through the same checks as a host line.
        HostSettings::from(&self.session)
            .check()
            .map_err(|e| eyre::eyre!("session defaults: {e}"))?;

        // Sim
        if !(0.0..1.0).contains(&self.sim.deadzone) {
            eyre::bail!("sim.deadzone must be in [0.0, 1.0)");
        }
        if !(self.sim.max_rad_s.is_finite() && self.sim.max_rad_s > 0.0) {
            eyre::bail!("sim.max_rad_s must be > 0");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
