#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core motor-control logic (hardware-agnostic).
//!
//! All hardware interactions go through `servo_traits::Encoder`,
//! `servo_traits::SpiBus` and `servo_traits::ChipSelect`.
//!
//! ## Architecture
//!
//! - **Scheduler**: cooperative interval tasks over a shared context (`scheduler`)
//! - **Samples**: bounded encoder history and velocity estimation (`samples`, `velocity`)
//! - **Control**: P/PI/PID with an offset bias (`pid`)
//! - **Calibration**: triangle sweep that finds the breakaway command (`calibration`)
//! - **Actuator**: AD5293 digipot driver and its transforms (`actuator`)
//! - **Session**: calibrate then control until the time limit (`session`, `runner`)
//!
//! Velocity is carried internally as counts per nanosecond; host units are
//! radians per second and are converted once per session (`conversions`).

pub mod actuator;
pub mod atomic;
pub mod builder;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod pid;
pub mod runner;
pub mod samples;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod util;
pub mod velocity;

pub use actuator::{Digipot, DriverState, LookupTable, Transform, affine_register};
pub use builder::{Missing, ServoBuilder, Set};
pub use calibration::{BiasCalibration, CalibrationState, CalibrationStep, TriangleRamp};
pub use config::{
    ActuatorCfg, BufferCfg, CalibrationCfg, CalibrationMode, ControlCfg, ControlLaw, ControlMode,
    TransformKind,
};
pub use conversions::{HostUnits, SessionParams, session_params};
pub use error::{BuildError, Report, Result, ServoError};
pub use pid::{Pid, PidGains, PidOutput, PidPhase, PidState};
pub use runner::{HostRunner, ServeSummary};
pub use samples::{Sample, SampleBuffer};
pub use scheduler::{Dispatch, RunExit, Scheduler, TaskFault};
pub use session::{SelfCheck, Servo, SessionContext};
pub use status::{SessionReport, ShutdownReport, TelemetryRecord, TracePoint};
pub use velocity::{VelocityEstimator, fold_degrees};
