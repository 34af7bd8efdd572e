//! Session controller: calibration phase, then timed closed-loop control.
//!
//! All loop state lives in [`SessionContext`], which the scheduler hands to
//! each task callback. Nothing is global; a `Servo` can run any number of
//! sessions back to back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use servo_traits::{ChipSelect, Clock, Encoder, SpiBus};
use tracing::{debug, error, info, warn};

use crate::actuator::{Digipot, DriverState};
use crate::builder::{Missing, ServoBuilder};
use crate::calibration::{BiasCalibration, CalibrationStep, TriangleRamp};
use crate::config::{CalibrationCfg, CalibrationMode, ControlCfg, ControlMode};
use crate::conversions::{HostUnits, SessionParams, session_params};
use crate::error::{Report, Result, ServoError};
use crate::hw_error::{Seam, map_hw_error};
use crate::pid::Pid;
use crate::samples::{Sample, SampleBuffer};
use crate::scheduler::{Dispatch, RunExit, Scheduler, TaskFault};
use crate::status::{SessionReport, ShutdownReport, TelemetryRecord, trace_from_samples};
use crate::util::ns_to_secs;
use crate::velocity::VelocityEstimator;

pub const CALIBRATION_TASK: &str = "calibration";
pub const CONTROL_TASK: &str = "control";
pub const WATCHDOG_TASK: &str = "watchdog";
pub const SWEEP_TASK: &str = "sweep";

pub type BoxedDigipot = Digipot<Box<dyn SpiBus>, Box<dyn ChipSelect>>;

/// Raw register sweep in progress.
#[derive(Debug)]
struct SweepState {
    ramp: TriangleRamp,
    remaining: u32,
    written: Vec<u16>,
}

/// Everything the task callbacks touch.
pub struct SessionContext {
    pub(crate) encoder: Box<dyn Encoder>,
    pub(crate) actuator: BoxedDigipot,
    pub(crate) buffer: SampleBuffer,
    pub(crate) estimator: VelocityEstimator,
    pub(crate) pid: Pid,
    pub(crate) calibration: BiasCalibration,
    pub(crate) units: HostUnits,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) epoch: Instant,
    control_start_ns: u64,
    telemetry: Vec<TelemetryRecord>,
    trace: Option<Vec<Sample>>,
    failure: Option<ServoError>,
    skipped: u32,
    sweep: Option<SweepState>,
}

#[inline]
fn direction_of(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

impl SessionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        encoder: Box<dyn Encoder>,
        actuator: BoxedDigipot,
        buffer: SampleBuffer,
        estimator: VelocityEstimator,
        pid: Pid,
        calibration: BiasCalibration,
        units: HostUnits,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            encoder,
            actuator,
            buffer,
            estimator,
            pid,
            calibration,
            units,
            clock,
            epoch,
            control_start_ns: 0,
            telemetry: Vec::new(),
            trace: None,
            failure: None,
            skipped: 0,
            sweep: None,
        }
    }

    #[inline]
    fn now_ns(&self) -> u64 {
        self.clock.ns_since(self.epoch)
    }

    fn read_position(&mut self) -> Result<i32, ServoError> {
        self.encoder
            .position()
            .map_err(|e| map_hw_error(e.as_ref(), Seam::Encoder))
    }

    fn begin(&mut self, params: &SessionParams) {
        self.buffer.clear();
        self.pid.reset();
        self.pid.configure(params.target, params.gains);
        self.calibration.reset();
        self.telemetry.clear();
        self.trace = None;
        self.failure = None;
        self.skipped = 0;
        self.control_start_ns = 0;
    }

    /// Zero the actuator (best effort), remember the first failure and stop.
    fn fail(&mut self, err: ServoError, d: &mut Dispatch) {
        error!(error = %err, "session failed; forcing zero command");
        if let Err(z) = self.actuator.zero() {
            warn!(error = %z, "zero command after failure also failed");
        }
        self.failure.get_or_insert(err);
        d.stop();
    }

    fn calibration_tick(&mut self, d: &mut Dispatch) -> Result<(), ServoError> {
        let position = match self.read_position() {
            Ok(p) => p,
            Err(e) => {
                self.fail(e, d);
                return Ok(());
            }
        };
        match self.calibration.step(position) {
            CalibrationStep::Command(v) => {
                if let Err(e) = self.actuator.set_normalized(v) {
                    self.fail(e, d);
                }
            }
            CalibrationStep::Settled { bias } => {
                self.pid.activate(bias);
                d.unregister(CALIBRATION_TASK);
                if let Err(e) = self.actuator.zero() {
                    self.fail(e, d);
                }
            }
            CalibrationStep::TimedOut { ticks } => {
                self.fail(ServoError::CalibrationTimeout { ticks }, d);
            }
        }
        Ok(())
    }

    fn control_tick(&mut self, d: &mut Dispatch) -> Result<(), ServoError> {
        let position = self.read_position()?;
        let now = self.now_ns();
        self.buffer.push(position, now);

        let measured = match self.pid.mode() {
            ControlMode::Velocity => match self.estimator.counts_per_ns(&self.buffer) {
                Ok(v) => v,
                Err(e) => {
                    self.skipped += 1;
                    debug!(error = %e, "control tick skipped");
                    return Ok(());
                }
            },
            ControlMode::Angle => self.estimator.angle_degrees(position),
        };
        let Some(out) = self.pid.tick(measured, now) else {
            return Ok(());
        };

        match self.actuator.set_normalized(out.output) {
            Ok(register) => self.telemetry.push(TelemetryRecord {
                time_s: ns_to_secs(now.saturating_sub(self.control_start_ns)),
                angle_deg: self.estimator.angle_degrees(position),
                error: self.units.to_host(out.error),
                commanded: out.output,
                register,
                direction: direction_of(out.output),
            }),
            Err(e) => self.fail(e, d),
        }
        Ok(())
    }

    fn watchdog(&mut self, d: &mut Dispatch) -> Result<(), ServoError> {
        info!(ticks = self.telemetry.len(), "time limit reached");
        if let Err(e) = self.actuator.zero() {
            error!(error = %e, "zero command at time limit failed");
            self.failure.get_or_insert(e);
        }
        self.trace = Some(self.buffer.snapshot());
        d.stop();
        Ok(())
    }

    fn sweep_tick(&mut self, d: &mut Dispatch) -> Result<(), ServoError> {
        let Some(sweep) = self.sweep.as_mut() else {
            d.stop();
            return Ok(());
        };
        if sweep.remaining == 0 {
            d.stop();
            return Ok(());
        }
        let register = u16::try_from(sweep.ramp.advance()).unwrap_or(0);
        match self.actuator.set_raw(register) {
            Ok(r) => {
                sweep.written.push(r);
                sweep.remaining -= 1;
            }
            Err(e) => self.fail(e, d),
        }
        Ok(())
    }

    fn report(&mut self, bias: f64) -> SessionReport {
        let state = *self.pid.state();
        let ran = state.last_sample_time.is_some();
        let target = self.pid.target();
        let samples = self
            .trace
            .take()
            .unwrap_or_else(|| self.buffer.snapshot());
        SessionReport {
            bias,
            final_error: ran.then(|| self.units.to_host(state.last_error)),
            final_error_pct: (ran && target != 0.0).then(|| 100.0 * state.last_error / target),
            telemetry: std::mem::take(&mut self.telemetry),
            trace: trace_from_samples(&samples),
            skipped_ticks: self.skipped,
            faults: Vec::new(),
        }
    }
}

/// Outcome of [`Servo::self_check`].
#[derive(Debug, Clone, PartialEq)]
pub struct SelfCheck {
    pub driver: DriverState,
    pub init_error: Option<ServoError>,
    pub zero_register: Result<u16, ServoError>,
    pub encoder_position: Result<i32, ServoError>,
}

impl SelfCheck {
    pub fn passed(&self) -> bool {
        self.driver == DriverState::Ready
            && self.zero_register.is_ok()
            && self.encoder_position.is_ok()
    }
}

pub struct Servo {
    pub(crate) ctx: SessionContext,
    pub(crate) scheduler: Scheduler<SessionContext>,
    pub(crate) control: ControlCfg,
    pub(crate) calibration: CalibrationCfg,
    pub(crate) counts_per_rev: u32,
    pub(crate) last_faults: Vec<TaskFault>,
}

impl core::fmt::Debug for Servo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Servo")
            .field("actuator", &self.ctx.actuator)
            .field("mode", &self.control.mode)
            .field("law", &self.control.law)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Servo {
    /// Start building a Servo.
    pub fn builder() -> ServoBuilder<Missing, Missing> {
        ServoBuilder::default()
    }

    pub fn actuator_state(&self) -> DriverState {
        self.ctx.actuator.state()
    }

    /// Why the actuator came up disabled, if it did.
    pub fn init_error(&self) -> Option<&ServoError> {
        self.ctx.actuator.init_error()
    }

    pub fn last_register(&self) -> Option<u16> {
        self.ctx.actuator.last_register()
    }

    pub fn control_cfg(&self) -> &ControlCfg {
        &self.control
    }

    /// Task faults isolated during the most recent session, whether it
    /// succeeded or not.
    pub fn last_faults(&self) -> &[TaskFault] {
        &self.last_faults
    }

    /// Validate host settings and convert them for this servo's encoder and mode.
    pub fn session_params(
        &self,
        host: &servo_config::HostSettings,
    ) -> Result<SessionParams, ServoError> {
        session_params(host, &self.control, self.counts_per_rev)
    }

    /// Run one full session: reset, calibrate, control until the time limit.
    ///
    /// Any actuator failure forces a zero command and ends the session with
    /// the underlying `ServoError` inside the report.
    pub fn run_session(&mut self, params: &SessionParams) -> Result<SessionReport> {
        let result = self.run_session_inner(params);
        self.scheduler.clear();
        let faults = self.scheduler.take_faults();
        self.last_faults.clone_from(&faults);
        match result {
            Ok(mut report) => {
                report.faults = faults;
                info!(
                    bias = report.bias,
                    final_error = report.final_error,
                    final_error_pct = report.final_error_pct,
                    ticks = report.telemetry.len(),
                    skipped = report.skipped_ticks,
                    "session complete"
                );
                Ok(report)
            }
            Err(e) => {
                for f in &faults {
                    warn!(task = %f.task, error = %f.error, "task fault in failed session");
                }
                Err(Report::new(e))
            }
        }
    }

    fn run_session_inner(&mut self, params: &SessionParams) -> Result<SessionReport, ServoError> {
        info!(
            target = params.host.target,
            time_limit = params.host.time_limit,
            rate = params.host.rate,
            interval_us = params.interval.as_micros() as u64,
            "session start"
        );
        self.scheduler.clear();
        self.scheduler.take_faults();
        self.ctx.begin(params);

        let bias = match self.calibration.mode {
            CalibrationMode::Fixed => params.bias,
            CalibrationMode::Sweep => {
                self.scheduler.register(
                    CALIBRATION_TASK,
                    self.calibration.interval,
                    |ctx: &mut SessionContext, d| ctx.calibration_tick(d),
                )?;
                let exit = self.scheduler.run(&mut self.ctx);
                self.settle(exit)?;
                self.ctx
                    .pid
                    .bias()
                    .ok_or_else(|| ServoError::CalibrationTimeout {
                        ticks: self.ctx.calibration.ticks(),
                    })?
            }
        };
        self.ctx.pid.activate(bias);

        let position = match self.ctx.read_position() {
            Ok(p) => p,
            Err(e) => return Err(self.zero_and(e)),
        };
        let now = self.ctx.now_ns();
        self.ctx.control_start_ns = now;
        self.ctx.buffer.push(position, now);

        self.scheduler
            .register(CONTROL_TASK, params.interval, |ctx: &mut SessionContext, d| {
                ctx.control_tick(d)
            })?;
        self.scheduler.register(
            WATCHDOG_TASK,
            params.time_limit,
            |ctx: &mut SessionContext, d| ctx.watchdog(d),
        )?;
        let exit = self.scheduler.run(&mut self.ctx);
        self.settle(exit)?;
        Ok(self.ctx.report(bias))
    }

    /// Sweep the raw register as a triangle wave across `[0, 1023]`, starting
    /// at midscale, for `steps` writes. Returns every register written.
    pub fn sweep(&mut self, interval: Duration, steps: u32, step: i32) -> Result<Vec<u16>> {
        self.scheduler.clear();
        self.ctx.failure = None;
        self.ctx.sweep = Some(SweepState {
            ramp: TriangleRamp::new(0, 1023, 512, step, 1),
            remaining: steps,
            written: Vec::with_capacity(steps as usize),
        });
        let outcome = self
            .scheduler
            .register(SWEEP_TASK, interval, |ctx: &mut SessionContext, d| {
                ctx.sweep_tick(d)
            })
            .and_then(|()| {
                let exit = self.scheduler.run(&mut self.ctx);
                self.settle(exit)
            });
        self.scheduler.clear();
        let written = self
            .ctx
            .sweep
            .take()
            .map(|s| s.written)
            .unwrap_or_default();
        outcome.map_err(Report::new)?;
        self.ctx.actuator.zero().map_err(Report::new)?;
        Ok(written)
    }

    /// Zero the actuator and read the encoder once.
    pub fn self_check(&mut self) -> SelfCheck {
        SelfCheck {
            driver: self.ctx.actuator.state(),
            init_error: self.ctx.actuator.init_error().cloned(),
            zero_register: self.ctx.actuator.zero(),
            encoder_position: self.ctx.read_position(),
        }
    }

    /// Zero the output and release the bus. Safe to call more than once.
    pub fn shutdown(&mut self) -> ShutdownReport {
        self.scheduler.clear();
        self.ctx.actuator.shutdown()
    }

    fn zero_and(&mut self, err: ServoError) -> ServoError {
        if let Err(z) = self.ctx.actuator.zero() {
            warn!(error = %z, "zero command failed");
        }
        err
    }

    fn settle(&mut self, exit: RunExit) -> Result<(), ServoError> {
        if let Some(e) = self.ctx.failure.take() {
            return Err(e);
        }
        if exit == RunExit::Aborted {
            warn!("aborted; zeroing actuator");
            return Err(self.zero_and(ServoError::Aborted));
        }
        Ok(())
    }
}
