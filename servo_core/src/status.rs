//! Session results and shutdown bookkeeping.

use crate::error::ServoError;
use crate::samples::Sample;
use crate::scheduler::TaskFault;
use crate::util::ns_to_secs;

/// Failures collected while releasing resources. Never silently dropped:
/// callers log or surface a non-clean report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    pub failures: Vec<(&'static str, ServoError)>,
}

impl ShutdownReport {
    pub fn record(&mut self, resource: &'static str, err: ServoError) {
        self.failures.push((resource, err));
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: ShutdownReport) {
        self.failures.extend(other.failures);
    }
}

/// One control tick as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    /// Seconds since the control phase started.
    pub time_s: f64,
    /// Shaft angle in `[-180, 180)` degrees.
    pub angle_deg: f64,
    /// Error in host units (rad/s or degrees).
    pub error: f64,
    /// Normalized command before the actuator clamps it.
    pub commanded: f64,
    /// Register actually written to the pot.
    pub register: u16,
    /// Sign of the command: 1, -1 or 0.
    pub direction: i8,
}

/// A trace point relative to the first retained sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    pub position: i32,
    pub time_s: f64,
}

pub fn trace_from_samples(samples: &[Sample]) -> Vec<TracePoint> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };
    samples
        .iter()
        .map(|s| TracePoint {
            position: s.position,
            time_s: ns_to_secs(s.timestamp_ns.saturating_sub(first.timestamp_ns)),
        })
        .collect()
}

/// Everything a completed session hands back to the caller.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// Normalized bias used by the control phase.
    pub bias: f64,
    /// Last tick's error in host units, if any tick ran.
    pub final_error: Option<f64>,
    /// `100 * last_error / target`; `None` for a zero target or no ticks.
    pub final_error_pct: Option<f64>,
    pub telemetry: Vec<TelemetryRecord>,
    /// Sample history captured when the time limit fired.
    pub trace: Vec<TracePoint>,
    /// Ticks skipped for short history or a zero interval.
    pub skipped_ticks: u32,
    /// Task errors the scheduler isolated during the session.
    pub faults: Vec<TaskFault>,
}
