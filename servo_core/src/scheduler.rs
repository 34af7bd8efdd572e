//! Cooperative single-thread scheduler.
//!
//! Tasks are named, periodic callbacks over a shared context `T`. Each pass
//! runs every due task once, in ascending deadline order with registration
//! order breaking ties. Re-arm is fixed-phase (`next_due += interval`), so a
//! callback that overruns leaves later deadlines in the past and they catch up
//! on the following passes. The only suspension point is the idle sleep until
//! the earliest deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use servo_traits::Clock;
use tracing::{debug, error, trace};

use crate::error::ServoError;

pub type TaskFn<T> = Box<dyn FnMut(&mut T, &mut Dispatch) -> Result<(), ServoError>>;

/// Requests a running callback makes of the scheduler. Applied after the
/// callback returns.
#[derive(Debug, Default)]
pub struct Dispatch {
    stop: bool,
    unregister: Vec<String>,
}

impl Dispatch {
    /// Halt dispatch once the current callback returns.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Remove a task (possibly the caller) once the current callback returns.
    pub fn unregister(&mut self, name: impl Into<String>) {
        self.unregister.push(name.into());
    }
}

/// A callback error the scheduler logged and moved past.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFault {
    pub task: String,
    pub error: ServoError,
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// A callback (or the owner) asked to stop.
    Stopped,
    /// No enabled task left to run.
    Idle,
    /// The abort flag was raised.
    Aborted,
}

struct Task<T> {
    name: String,
    interval: Duration,
    next_due: Instant,
    seq: u64,
    enabled: bool,
    callback: TaskFn<T>,
}

pub struct Scheduler<T> {
    tasks: Vec<Task<T>>,
    clock: Arc<dyn Clock + Send + Sync>,
    next_seq: u64,
    stop_requested: bool,
    abort: Option<Arc<AtomicBool>>,
    faults: Vec<TaskFault>,
}

impl<T> core::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field(
                "tasks",
                &self.tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            )
            .field("stop_requested", &self.stop_requested)
            .finish()
    }
}

impl<T> Scheduler<T> {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            tasks: Vec::new(),
            clock,
            next_seq: 0,
            stop_requested: false,
            abort: None,
            faults: Vec::new(),
        }
    }

    /// Checked once per pass; when set, `run` returns `RunExit::Aborted`.
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    /// Add a task whose first run is one `interval` from now.
    pub fn register<F>(&mut self, name: &str, interval: Duration, callback: F) -> Result<(), ServoError>
    where
        F: FnMut(&mut T, &mut Dispatch) -> Result<(), ServoError> + 'static,
    {
        if self.contains(name) {
            return Err(ServoError::DuplicateName(name.to_owned()));
        }
        if interval.is_zero() {
            return Err(ServoError::Config(format!(
                "task '{name}' interval must be > 0"
            )));
        }
        let next_due = self.clock.now().checked_add(interval).ok_or_else(|| {
            ServoError::Config(format!("task '{name}' interval {interval:?} is out of range"))
        })?;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.push(Task {
            name: name.to_owned(),
            interval,
            next_due,
            seq,
            enabled: true,
            callback: Box::new(callback),
        });
        debug!(task = name, ?interval, "task registered");
        Ok(())
    }

    /// Remove a task by name. Absent names are a no-op.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.name != name);
        let removed = self.tasks.len() != before;
        if removed {
            debug!(task = name, "task unregistered");
        }
        removed
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.tasks.iter_mut().find(|t| t.name == name) {
            Some(t) => {
                t.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every task and any pending stop request.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.stop_requested = false;
    }

    /// Ask `run` to return after the in-flight callback.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn faults(&self) -> &[TaskFault] {
        &self.faults
    }

    pub fn take_faults(&mut self) -> Vec<TaskFault> {
        std::mem::take(&mut self.faults)
    }

    fn aborted(&self) -> bool {
        self.abort
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    fn earliest_due(&self) -> Option<Instant> {
        self.tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.next_due)
            .min()
    }

    /// Dispatch until stopped, aborted, or out of enabled tasks.
    pub fn run(&mut self, ctx: &mut T) -> RunExit {
        self.stop_requested = false;
        loop {
            if self.aborted() {
                debug!("scheduler aborted");
                return RunExit::Aborted;
            }
            if self.stop_requested {
                self.stop_requested = false;
                return RunExit::Stopped;
            }
            let Some(next) = self.earliest_due() else {
                return RunExit::Idle;
            };
            let now = self.clock.now();
            if next > now {
                self.clock.sleep(next - now);
                continue;
            }
            self.run_pending(ctx);
        }
    }

    /// One pass: run every task due now, once each. Returns how many ran.
    pub fn run_pending(&mut self, ctx: &mut T) -> usize {
        let now = self.clock.now();
        let mut due: Vec<(Instant, u64)> = self
            .tasks
            .iter()
            .filter(|t| t.enabled && t.next_due <= now)
            .map(|t| (t.next_due, t.seq))
            .collect();
        due.sort_unstable();

        let mut ran = 0;
        for (_, seq) in due {
            if self.stop_requested {
                break;
            }
            // an earlier callback this pass may have removed it
            let Some(task) = self.tasks.iter_mut().find(|t| t.seq == seq) else {
                continue;
            };
            match task.next_due.checked_add(task.interval) {
                Some(next) => task.next_due = next,
                None => {
                    // runs this once more, then never again
                    task.enabled = false;
                    let e = ServoError::Config(format!(
                        "task '{}' deadline is out of range; disabled",
                        task.name
                    ));
                    error!(task = %task.name, error = %e, "re-arm failed");
                    self.faults.push(TaskFault {
                        task: task.name.clone(),
                        error: e,
                    });
                }
            }
            let mut dispatch = Dispatch::default();
            trace!(task = %task.name, "dispatch");
            let result = (task.callback)(ctx, &mut dispatch);
            ran += 1;
            if let Err(e) = result {
                error!(task = %task.name, error = %e, "task failed; continuing");
                self.faults.push(TaskFault {
                    task: task.name.clone(),
                    error: e,
                });
            }
            for name in dispatch.unregister {
                self.unregister(&name);
            }
            if dispatch.stop {
                self.stop_requested = true;
            }
        }
        ran
    }
}
