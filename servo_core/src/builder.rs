//! Type-state builder for `Servo`.
//!
//! The builder enforces at compile time that an encoder and an actuator bus are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use servo_traits::{ChipSelect, Clock, Encoder, MonotonicClock, SpiBus};

use crate::actuator::{Digipot, Transform};
use crate::calibration::{BiasCalibration, RAMP_LIMIT};
use crate::config::{ActuatorCfg, BufferCfg, CalibrationCfg, ControlCfg, TransformKind};
use crate::conversions::HostUnits;
use crate::error::{BuildError, Result};
use crate::pid::Pid;
use crate::samples::SampleBuffer;
use crate::scheduler::Scheduler;
use crate::session::{SessionContext, Servo};
use crate::velocity::VelocityEstimator;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

#[derive(Default)]
struct Options {
    control: ControlCfg,
    calibration: CalibrationCfg,
    actuator: ActuatorCfg,
    buffer: BufferCfg,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    abort: Option<Arc<AtomicBool>>,
}

/// Builder for `Servo`. All settings are validated on `build()`.
pub struct ServoBuilder<E, A> {
    encoder: Option<Box<dyn Encoder>>,
    bus: Option<(Box<dyn SpiBus>, Box<dyn ChipSelect>)>,
    opts: Options,
    _e: PhantomData<E>,
    _a: PhantomData<A>,
}

impl Default for ServoBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            encoder: None,
            bus: None,
            opts: Options::default(),
            _e: PhantomData,
            _a: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn validate(opts: &Options) -> Result<()> {
    let b = &opts.buffer;
    if b.counts_per_rev == 0 {
        return Err(invalid("counts_per_rev must be > 0"));
    }
    if b.sample_offset == 0 {
        return Err(invalid("sample_offset must be >= 1"));
    }
    if b.capacity <= b.sample_offset {
        return Err(invalid("buffer capacity must exceed sample_offset"));
    }
    if !opts.control.integral_limit.is_finite() {
        return Err(invalid("integral_limit must be finite"));
    }
    let c = &opts.calibration;
    if !(1..=RAMP_LIMIT).contains(&c.step) {
        return Err(invalid("calibration step must be in [1, 512]"));
    }
    if c.movement_threshold <= 0 {
        return Err(invalid("movement_threshold must be > 0"));
    }
    if c.interval.is_zero() {
        return Err(invalid("calibration interval must be > 0"));
    }
    if !matches!(c.direction, 1 | -1) {
        return Err(invalid("calibration direction must be 1 or -1"));
    }
    if opts.actuator.init_attempts == 0 {
        return Err(invalid("init_attempts must be >= 1"));
    }
    if let TransformKind::Lookup { resolution } = opts.actuator.transform
        && resolution < 2
    {
        return Err(invalid("lookup resolution must be >= 2"));
    }
    Ok(())
}

fn validate_and_build(
    encoder: Box<dyn Encoder>,
    bus: Box<dyn SpiBus>,
    cs: Box<dyn ChipSelect>,
    opts: Options,
) -> Result<Servo> {
    validate(&opts)?;

    let clock: Arc<dyn Clock + Send + Sync> = match opts.clock {
        Some(c) => c,
        None => Arc::new(MonotonicClock::new()),
    };
    let mut scheduler = Scheduler::new(clock.clone());
    if let Some(flag) = opts.abort {
        scheduler = scheduler.with_abort_flag(flag);
    }

    let actuator = Digipot::new(
        bus,
        cs,
        Transform::from(opts.actuator.transform),
        opts.actuator.init_attempts,
    );
    let ctx = SessionContext::new(
        encoder,
        actuator,
        SampleBuffer::with_capacity(opts.buffer.capacity),
        VelocityEstimator::new(opts.buffer.sample_offset, opts.buffer.counts_per_rev),
        Pid::new(
            opts.control.law,
            opts.control.mode,
            opts.control.integral_limit,
        ),
        BiasCalibration::new(&opts.calibration),
        HostUnits::new(opts.control.mode, opts.buffer.counts_per_rev),
        clock,
    );

    Ok(Servo {
        ctx,
        scheduler,
        control: opts.control,
        calibration: opts.calibration,
        counts_per_rev: opts.buffer.counts_per_rev,
        last_faults: Vec::new(),
    })
}

impl<E, A> ServoBuilder<E, A> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Servo> {
        let encoder = self
            .encoder
            .ok_or_else(|| eyre::Report::new(BuildError::MissingEncoder))?;
        let (bus, cs) = self
            .bus
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBus))?;
        validate_and_build(encoder, bus, cs, self.opts)
    }
}

/// Chainable setters that do not affect type-state.
impl<E, A> ServoBuilder<E, A> {
    pub fn with_control(mut self, control: ControlCfg) -> Self {
        self.opts.control = control;
        self
    }
    pub fn with_calibration(mut self, calibration: CalibrationCfg) -> Self {
        self.opts.calibration = calibration;
        self
    }
    pub fn with_actuator_cfg(mut self, actuator: ActuatorCfg) -> Self {
        self.opts.actuator = actuator;
        self
    }
    pub fn with_buffer(mut self, buffer: BufferCfg) -> Self {
        self.opts.buffer = buffer;
        self
    }
    /// Apply every section of a loaded config file.
    pub fn with_config(self, cfg: &servo_config::Config) -> Self {
        self.with_control((&cfg.control).into())
            .with_calibration((&cfg.calibration).into())
            .with_actuator_cfg((&cfg.actuator).into())
            .with_buffer(cfg.into())
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.opts.clock = Some(clock);
        self
    }
    /// Flag polled by the scheduler; setting it ends the current session fail-safe.
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.opts.abort = Some(flag);
        self
    }
}

// Setters that advance type-state
impl<A> ServoBuilder<Missing, A> {
    pub fn with_encoder(self, encoder: impl Encoder + 'static) -> ServoBuilder<Set, A> {
        ServoBuilder {
            encoder: Some(Box::new(encoder)),
            bus: self.bus,
            opts: self.opts,
            _e: PhantomData,
            _a: PhantomData,
        }
    }
}

impl<E> ServoBuilder<E, Missing> {
    pub fn with_actuator(
        self,
        bus: impl SpiBus + 'static,
        cs: impl ChipSelect + 'static,
    ) -> ServoBuilder<E, Set> {
        ServoBuilder {
            encoder: self.encoder,
            bus: Some((Box::new(bus), Box::new(cs))),
            opts: self.opts,
            _e: PhantomData,
            _a: PhantomData,
        }
    }
}

impl ServoBuilder<Set, Set> {
    /// Validate and build the Servo. Only available once the encoder and bus are set.
    pub fn build(self) -> Result<Servo> {
        self.try_build()
    }
}
