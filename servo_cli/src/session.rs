//! Backend assembly and the loop-running commands: run, serve, sweep, self-check.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::WrapErr;
use serde::Serialize;
use servo_config::{Config, HostParams, HostSettings, RuntimeCfg};
use servo_core::error::{Report, ServoError};
use servo_core::{HostRunner, SelfCheck, Servo, SessionReport, TelemetryRecord, TracePoint};
use servo_traits::{Clock, ManualClock, MonotonicClock};

use crate::cli::{Backend, RtArgs, RtLock, SessionArgs};
use crate::rt::setup_rt_once;

/// One telemetry line per control tick. Field order is part of the host contract.
#[derive(Debug, Serialize)]
struct TelemetryLine {
    time: f64,
    deg: f64,
    error: f64,
    pwm_theoretical: f64,
    pwm_actual: u16,
    dir: i8,
}

impl From<&TelemetryRecord> for TelemetryLine {
    fn from(r: &TelemetryRecord) -> Self {
        Self {
            time: r.time_s,
            deg: r.angle_deg,
            error: r.error,
            pwm_theoretical: r.commanded,
            pwm_actual: r.register,
            dir: r.direction,
        }
    }
}

/// Closing line of a session.
#[derive(Debug, Serialize)]
struct SummaryLine {
    bias: f64,
    final_error: Option<f64>,
    final_error_pct: Option<f64>,
    ticks: usize,
    skipped: u32,
    faults: usize,
}

impl From<&SessionReport> for SummaryLine {
    fn from(r: &SessionReport) -> Self {
        Self {
            bias: r.bias,
            final_error: r.final_error,
            final_error_pct: r.final_error_pct,
            ticks: r.telemetry.len(),
            skipped: r.skipped_ticks,
            faults: r.faults.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TraceRow {
    position: i32,
    time_s: f64,
}

#[derive(Debug, Serialize)]
struct SelfCheckLine {
    driver: String,
    init_error: Option<String>,
    zero_register: Option<u16>,
    encoder_position: Option<i32>,
    passed: bool,
}

impl From<&SelfCheck> for SelfCheckLine {
    fn from(c: &SelfCheck) -> Self {
        Self {
            driver: format!("{:?}", c.driver),
            init_error: c.init_error.as_ref().map(ToString::to_string),
            zero_register: c.zero_register.as_ref().ok().copied(),
            encoder_position: c.encoder_position.as_ref().ok().copied(),
            passed: c.passed(),
        }
    }
}

impl SessionArgs {
    fn to_params(&self) -> HostParams {
        HostParams {
            target: self.target,
            time_limit: self.time_limit,
            rate: self.rate,
            bias: self.bias,
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }
}

/// Assemble the encoder and actuator for `backend` and build the servo.
pub fn build_servo(cfg: &Config, backend: Backend, abort: Arc<AtomicBool>) -> eyre::Result<Servo> {
    match backend {
        Backend::Sim => build_sim(cfg, abort),
        Backend::Hardware => build_hardware(cfg, abort),
    }
}

fn build_sim(cfg: &Config, abort: Arc<AtomicBool>) -> eyre::Result<Servo> {
    use servo_hardware::{RotorModel, SimulatedRig};

    let clock: Arc<dyn Clock + Send + Sync> = if cfg.sim.realtime {
        Arc::new(MonotonicClock::new())
    } else {
        Arc::new(ManualClock::new())
    };
    let rig = SimulatedRig::new(
        RotorModel {
            counts_per_rev: cfg.encoder.counts_per_rev,
            deadzone: cfg.sim.deadzone,
            max_rad_s: cfg.sim.max_rad_s,
        },
        Arc::clone(&clock),
    );
    let (bus, cs, encoder) = rig.split();
    tracing::info!(
        realtime = cfg.sim.realtime,
        deadzone = cfg.sim.deadzone,
        max_rad_s = cfg.sim.max_rad_s,
        "using simulated rig"
    );
    Servo::builder()
        .with_config(cfg)
        .with_clock(clock)
        .with_abort_flag(abort)
        .with_encoder(encoder)
        .with_actuator(bus, cs)
        .build()
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn build_hardware(cfg: &Config, abort: Arc<AtomicBool>) -> eyre::Result<Servo> {
    use servo_hardware::rpi::{GpioChipSelect, QuadratureEncoder, RppalBus};

    let pins = cfg.pins.as_ref().ok_or_else(|| {
        Report::new(ServoError::Config(
            "[pins] is required for the hardware backend".into(),
        ))
    })?;
    let bus = RppalBus::new(pins.spi_bus, pins.spi_slave_select, cfg.actuator.clock_hz)
        .wrap_err("open spi bus")?;
    let cs = GpioChipSelect::new(pins.chip_select).wrap_err("open chip select pin")?;
    let encoder =
        QuadratureEncoder::new(pins.encoder_a, pins.encoder_b).wrap_err("open encoder pins")?;
    tracing::info!(
        spi_bus = pins.spi_bus,
        slave_select = pins.spi_slave_select,
        chip_select = pins.chip_select,
        encoder_a = pins.encoder_a,
        encoder_b = pins.encoder_b,
        "using hardware backend"
    );
    Servo::builder()
        .with_config(cfg)
        .with_clock(Arc::new(MonotonicClock::new()))
        .with_abort_flag(abort)
        .with_encoder(encoder)
        .with_actuator(bus, cs)
        .build()
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn build_hardware(_cfg: &Config, _abort: Arc<AtomicBool>) -> eyre::Result<Servo> {
    eyre::bail!("hardware backend is not available in this build (needs the `hardware` feature on Linux)")
}

/// CLI flags win over `[runtime]`.
pub fn apply_rt(runtime: &RuntimeCfg, args: &RtArgs) {
    setup_rt_once(
        args.rt || runtime.rt,
        args.rt_prio.or(runtime.rt_priority),
        args.rt_lock.unwrap_or_else(RtLock::os_default),
        args.rt_cpu.or(runtime.rt_cpu),
    );
}

/// Zero the output and release the bus, logging anything that did not come down cleanly.
pub fn release(servo: &mut Servo) {
    let report = servo.shutdown();
    for (resource, err) in &report.failures {
        tracing::warn!(resource, error = %err, "shutdown failure");
    }
}

fn write_report(out: &mut impl Write, report: &SessionReport) -> eyre::Result<()> {
    for rec in &report.telemetry {
        serde_json::to_writer(&mut *out, &TelemetryLine::from(rec))?;
        out.write_all(b"\n")?;
    }
    serde_json::to_writer(&mut *out, &SummaryLine::from(report))?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn write_trace<W: Write>(w: &mut csv::Writer<W>, trace: &[TracePoint]) -> eyre::Result<()> {
    for p in trace {
        w.serialize(TraceRow {
            position: p.position,
            time_s: p.time_s,
        })?;
    }
    w.flush()?;
    Ok(())
}

/// Write the trace as `position,time_s` CSV; `-` means stdout.
fn export_trace(path: &Path, trace: &[TracePoint]) -> eyre::Result<()> {
    if path == Path::new("-") {
        let mut w = csv::Writer::from_writer(io::stdout().lock());
        return write_trace(&mut w, trace);
    }
    let mut w = csv::Writer::from_writer(Vec::new());
    write_trace(&mut w, trace)?;
    let bytes = w
        .into_inner()
        .map_err(|e| eyre::eyre!("trace buffer: {e}"))?;
    servo_core::atomic::write_atomic(path, &bytes)
        .wrap_err_with(|| format!("write trace {}", path.display()))?;
    tracing::info!(path = %path.display(), points = trace.len(), "trace written");
    Ok(())
}

/// Calibrate and run one session with `[session]` defaults overlaid by CLI flags.
pub fn run_once(
    servo: &mut Servo,
    cfg: &Config,
    args: &SessionArgs,
    trace: Option<&Path>,
) -> eyre::Result<()> {
    let settings = HostSettings::from(&cfg.session).merge(&args.to_params());
    let params = servo.session_params(&settings)?;
    let report = servo.run_session(&params)?;
    write_report(&mut io::stdout().lock(), &report)?;
    if let Some(path) = trace {
        export_trace(path, &report.trace)?;
    }
    Ok(())
}

/// One session per accepted stdin line until EOF.
pub fn serve(servo: &mut Servo, cfg: &Config) -> eyre::Result<()> {
    let mut runner = HostRunner::new(HostSettings::from(&cfg.session));
    let stdout = io::stdout();
    let summary = runner.serve(servo, io::stdin().lock(), |_, report| {
        write_report(&mut stdout.lock(), report)
    })?;
    tracing::info!(
        sessions = summary.sessions,
        rejected = summary.rejected,
        failed = summary.failed,
        "host input closed"
    );
    Ok(())
}

/// Raw register sweep; prints every register written, one per line.
pub fn sweep(servo: &mut Servo, steps: u32, step: i32, interval_ms: u64) -> eyre::Result<()> {
    if !(1..=1023).contains(&step) {
        return Err(Report::new(ServoError::Config(
            "sweep step must be in [1, 1023]".into(),
        )));
    }
    if interval_ms == 0 {
        return Err(Report::new(ServoError::Config(
            "sweep interval must be >= 1 ms".into(),
        )));
    }
    let written = servo.sweep(Duration::from_millis(interval_ms), steps, step)?;
    let mut out = io::stdout().lock();
    for r in &written {
        writeln!(out, "{r}")?;
    }
    out.flush()?;
    Ok(())
}

/// Print the check as one JSON line; a failed check becomes the command's error.
pub fn self_check(servo: &mut Servo) -> eyre::Result<()> {
    let check = servo.self_check();
    let mut out = io::stdout().lock();
    serde_json::to_writer(&mut out, &SelfCheckLine::from(&check))?;
    out.write_all(b"\n")?;
    out.flush()?;
    if check.passed() {
        return Ok(());
    }
    let err = check
        .init_error
        .or(check.zero_register.err())
        .or(check.encoder_position.err())
        .unwrap_or(ServoError::BusUnavailable);
    Err(Report::new(err))
}
