use std::cell::RefCell;
use std::f64::consts::TAU;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rstest::rstest;
use servo_config::HostSettings;
use servo_core::mocks::{
    BreakawayEncoder, BusEvent, BusLog, ConstantSpeedEncoder, RecordingBus, RecordingChipSelect,
};
use servo_core::{
    CalibrationCfg, CalibrationMode, ControlCfg, ControlLaw, ControlMode, DriverState, Servo,
    ServoError, affine_register,
};
use servo_traits::{Encoder, HwResult, ManualClock};

const CPR: f64 = 2000.0;

fn fixed_calibration() -> CalibrationCfg {
    CalibrationCfg {
        mode: CalibrationMode::Fixed,
        ..CalibrationCfg::default()
    }
}

fn fast_sweep(max_ticks: u32) -> CalibrationCfg {
    CalibrationCfg {
        interval: Duration::from_millis(1),
        max_ticks,
        ..CalibrationCfg::default()
    }
}

fn host(target: f64, time_limit: f64, rate: f64, bias: f64) -> HostSettings {
    HostSettings {
        target,
        time_limit,
        rate,
        bias,
        ki: 0.0,
        kd: 0.0,
        ..HostSettings::default()
    }
}

fn build(
    encoder: impl Encoder + 'static,
    log: &Rc<RefCell<BusLog>>,
    clock: &ManualClock,
    calibration: CalibrationCfg,
) -> Servo {
    Servo::builder()
        .with_encoder(encoder)
        .with_actuator(
            RecordingBus::new(log.clone()),
            RecordingChipSelect::new(log.clone()),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_calibration(calibration)
        .build()
        .unwrap()
}

fn servo_error(e: &eyre::Report) -> &ServoError {
    e.downcast_ref::<ServoError>()
        .unwrap_or_else(|| panic!("expected ServoError, got {e:?}"))
}

/// Reads `10 * n` on every call except the listed ones, which fail.
struct FlakyEncoder {
    reads: u32,
    fail_on: &'static [u32],
}

impl Encoder for FlakyEncoder {
    fn position(&mut self) -> HwResult<i32> {
        self.reads += 1;
        if self.fail_on.contains(&self.reads) {
            return Err(Box::new(std::io::Error::other("missed edge")));
        }
        Ok(10 * self.reads as i32)
    }
}

#[rstest]
fn velocity_loop_holds_target_with_fixed_bias() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let counts_per_sec = 10.0 * CPR / TAU;
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), counts_per_sec);
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    let params = servo.session_params(&host(10.0, 0.2, 100.0, 100.0)).unwrap();
    assert_eq!(params.interval, Duration::from_millis(8));
    let report = servo.run_session(&params).unwrap();

    assert_eq!(report.bias, 100.0 / 512.0);
    assert_eq!(report.skipped_ticks, 1);
    assert!(report.telemetry.len() >= 20, "{}", report.telemetry.len());
    assert!(report.faults.is_empty());

    let final_error = report.final_error.unwrap();
    assert!(final_error.abs() < 0.5, "final error {final_error}");
    assert!(report.final_error_pct.unwrap().abs() < 5.0);

    let bias_register = i32::from(affine_register(100.0 / 512.0));
    for rec in &report.telemetry {
        assert!(rec.error.abs() < 0.5, "{rec:?}");
        assert!((i32::from(rec.register) - bias_register).abs() <= 2, "{rec:?}");
        assert_eq!(rec.direction, 1);
        assert!((-180.0..180.0).contains(&rec.angle_deg));
    }
    assert!(
        report
            .telemetry
            .windows(2)
            .all(|w| w[0].time_s < w[1].time_s)
    );

    assert_eq!(report.trace.first().map(|p| p.time_s), Some(0.0));
    assert!(report.trace.len() > report.telemetry.len());
    // zeroed when the time limit fired
    assert_eq!(log.borrow().last_register(), Some(512));
}

#[rstest]
#[case(8)]
#[case(40)]
#[case(200)]
fn sweep_calibration_finds_breakaway(#[case] breakaway: i32) {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let threshold = affine_register(f64::from(breakaway) / 512.0);
    let encoder = BreakawayEncoder::new(log.clone(), threshold, 50);
    let mut servo = build(encoder, &log, &clock, fast_sweep(4096));

    let params = servo.session_params(&host(10.0, 0.02, 100.0, 0.0)).unwrap();
    let report = servo.run_session(&params).unwrap();
    assert_eq!(report.bias, f64::from(breakaway) / 512.0);

    // the ramp stepped one register at a time up to the breakaway command
    let frames = log.borrow().frames();
    let ramp_top = frame_index(&frames, threshold);
    assert!(ramp_top.is_some());
}

fn frame_index(frames: &[Vec<u8>], register: u16) -> Option<usize> {
    let want = servo_core::actuator::frame(register);
    frames.iter().position(|f| f.as_slice() == want)
}

#[rstest]
fn still_rotor_times_out_and_zeroes() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = BreakawayEncoder::new(log.clone(), u16::MAX, 50);
    let mut servo = build(encoder, &log, &clock, fast_sweep(20));

    let params = servo.session_params(&host(10.0, 1.0, 100.0, 0.0)).unwrap();
    let err = servo.run_session(&params).unwrap_err();
    assert_eq!(
        servo_error(&err),
        &ServoError::CalibrationTimeout { ticks: 20 }
    );
    assert_eq!(log.borrow().last_register(), Some(512));
    assert_eq!(clock.elapsed(), Duration::from_millis(21));
}

#[rstest]
fn actuator_failure_forces_zero_attempt_and_ends_session() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    // two init frames, then three control writes succeed
    log.borrow_mut().fail_writes_after = Some(5);
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 3000.0);
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    let params = servo.session_params(&host(10.0, 1.0, 100.0, 50.0)).unwrap();
    let err = servo.run_session(&params).unwrap_err();
    assert!(matches!(servo_error(&err), ServoError::ActuatorWrite(_)));

    let events = log.borrow().events.clone();
    let tail = &events[events.len() - 4..];
    assert_eq!(
        tail,
        &[
            BusEvent::Select,
            BusEvent::Deselect,
            BusEvent::Select,
            BusEvent::Deselect
        ]
    );
    assert_eq!(log.borrow().frames().len(), 5);
}

#[rstest]
fn encoder_glitch_in_control_is_isolated() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = FlakyEncoder {
        reads: 0,
        fail_on: &[4, 5],
    };
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    let params = servo.session_params(&host(10.0, 0.1, 100.0, 20.0)).unwrap();
    let report = servo.run_session(&params).unwrap();
    assert_eq!(report.faults.len(), 2);
    assert!(report.faults.iter().all(|f| f.task == "control"));
    assert!(matches!(report.faults[0].error, ServoError::Encoder(_)));
    assert!(!report.telemetry.is_empty());
}

#[rstest]
fn faults_before_a_failure_are_kept() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    // two init frames and four control writes, then the bus dies
    log.borrow_mut().fail_writes_after = Some(6);
    let encoder = FlakyEncoder {
        reads: 0,
        fail_on: &[3],
    };
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    let params = servo.session_params(&host(10.0, 1.0, 100.0, 20.0)).unwrap();
    let err = servo.run_session(&params).unwrap_err();
    assert!(matches!(servo_error(&err), ServoError::ActuatorWrite(_)));
    let faults = servo.last_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].task, "control");
    assert!(matches!(faults[0].error, ServoError::Encoder(_)));
}

#[rstest]
#[case::huge_time_limit(HostSettings { time_limit: 1e300, ..HostSettings::default() })]
#[case::tiny_time_limit(HostSettings { time_limit: 1e-12, ..HostSettings::default() })]
#[case::tiny_rate(HostSettings { rate: 1e-300, ..HostSettings::default() })]
#[case::huge_rate(HostSettings { rate: 1e300, ..HostSettings::default() })]
fn extreme_timing_is_rejected_before_running(#[case] settings: HostSettings) {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 3000.0);
    let servo = build(encoder, &log, &clock, fixed_calibration());
    assert!(matches!(
        servo.session_params(&settings),
        Err(ServoError::MalformedCommand(_))
    ));
}

#[rstest]
#[case::shortest(1e-3, 1e6)]
#[case::slowest_rate(1e-3, 1e-3)]
#[case::longest_at_slowest_rate(86_400.0, 1e-3)]
fn accepted_timing_extremes_run_to_completion(#[case] time_limit: f64, #[case] rate: f64) {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 3000.0);
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    let settings = host(1.0, time_limit, rate, 20.0);
    settings.check().unwrap();
    let params = servo.session_params(&settings).unwrap();
    servo.run_session(&params).unwrap();
    assert_eq!(log.borrow().last_register(), Some(512));
}

#[rstest]
fn abort_flag_zeroes_and_reports_aborted() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let flag = Arc::new(AtomicBool::new(false));
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 3000.0);
    let mut servo = Servo::builder()
        .with_encoder(encoder)
        .with_actuator(
            RecordingBus::new(log.clone()),
            RecordingChipSelect::new(log.clone()),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_calibration(fixed_calibration())
        .with_abort_flag(flag.clone())
        .build()
        .unwrap();

    let params = servo.session_params(&host(10.0, 5.0, 100.0, 80.0)).unwrap();
    flag.store(true, Ordering::Relaxed);
    let err = servo.run_session(&params).unwrap_err();
    assert_eq!(servo_error(&err), &ServoError::Aborted);
    assert_eq!(log.borrow().last_register(), Some(512));
}

#[rstest]
fn angle_mode_reports_degrees() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 0.0);
    let mut servo = Servo::builder()
        .with_encoder(encoder)
        .with_actuator(
            RecordingBus::new(log.clone()),
            RecordingChipSelect::new(log.clone()),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_calibration(fixed_calibration())
        .with_control(ControlCfg {
            mode: ControlMode::Angle,
            law: ControlLaw::P,
            ..ControlCfg::default()
        })
        .build()
        .unwrap();

    let settings = HostSettings {
        kp: 0.001,
        ..host(90.0, 0.05, 100.0, 0.0)
    };
    let params = servo.session_params(&settings).unwrap();
    let report = servo.run_session(&params).unwrap();

    assert_eq!(report.skipped_ticks, 0);
    assert!(!report.telemetry.is_empty());
    for rec in &report.telemetry {
        assert_eq!(rec.angle_deg, 0.0);
        assert_eq!(rec.error, 90.0);
        assert!((rec.commanded - 0.09).abs() < 1e-12);
        assert_eq!(rec.register, affine_register(0.09));
    }
    assert_eq!(report.final_error_pct, Some(100.0));
}

#[rstest]
fn dead_bus_disables_actuator_and_rejects_session() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    log.borrow_mut().lock_failures = 10;
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 3000.0);
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    assert_eq!(servo.actuator_state(), DriverState::Disabled);
    assert_eq!(
        servo.init_error(),
        Some(&ServoError::BusInitFailure { attempts: 3 })
    );
    let params = servo.session_params(&host(10.0, 0.1, 100.0, 0.0)).unwrap();
    let err = servo.run_session(&params).unwrap_err();
    assert_eq!(servo_error(&err), &ServoError::BusUnavailable);
    assert!(log.borrow().frames().is_empty());
    assert!(!servo.self_check().passed());
}

#[rstest]
fn sessions_run_back_to_back() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 3000.0);
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    let params = servo.session_params(&host(10.0, 0.05, 100.0, 30.0)).unwrap();
    let first = servo.run_session(&params).unwrap();
    let second = servo.run_session(&params).unwrap();
    assert_eq!(first.skipped_ticks, second.skipped_ticks);
    assert_eq!(first.telemetry.len(), second.telemetry.len());
}

#[rstest]
fn raw_sweep_walks_a_triangle_then_zeroes() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 0.0);
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    let written = servo.sweep(Duration::from_millis(1), 8, 100).unwrap();
    assert_eq!(written, vec![612, 712, 812, 912, 1012, 1023, 923, 823]);
    assert_eq!(servo.last_register(), Some(512));
}

#[rstest]
fn self_check_passes_on_healthy_rig() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 0.0);
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    let check = servo.self_check();
    assert!(check.passed());
    assert_eq!(check.zero_register, Ok(512));
    assert_eq!(check.encoder_position, Ok(0));
}

#[rstest]
fn shutdown_is_idempotent() {
    let clock = ManualClock::new();
    let log = BusLog::shared();
    let encoder = ConstantSpeedEncoder::new(Arc::new(clock.clone()), 0.0);
    let mut servo = build(encoder, &log, &clock, fixed_calibration());

    assert!(servo.shutdown().is_clean());
    assert_eq!(log.borrow().events.last(), Some(&BusEvent::Unlock));
    let n = log.borrow().events.len();
    assert!(servo.shutdown().is_clean());
    drop(servo);
    assert_eq!(log.borrow().events.len(), n);
}
