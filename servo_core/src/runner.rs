//! Host command loop: one JSON line in, one session out.

use std::io::BufRead;

use servo_config::{HostSettings, parse_host_line};
use tracing::{info, warn};

use crate::conversions::SessionParams;
use crate::error::{Result, ServoError};
use crate::session::Servo;
use crate::status::SessionReport;

/// Counters for a finished [`HostRunner::serve`] loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub sessions: u32,
    pub rejected: u32,
    pub failed: u32,
}

/// Holds the settings of the previous session so partial host commands
/// only change what they name.
#[derive(Debug, Clone)]
pub struct HostRunner {
    settings: HostSettings,
}

impl Default for HostRunner {
    fn default() -> Self {
        Self::new(HostSettings::default())
    }
}

#[inline]
fn stops_serving(e: &ServoError) -> bool {
    matches!(
        e,
        ServoError::Aborted | ServoError::BusUnavailable | ServoError::BusInitFailure { .. }
    )
}

impl HostRunner {
    pub fn new(settings: HostSettings) -> Self {
        Self { settings }
    }

    /// Settings used by the most recent accepted command.
    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// Merge one host line into the current settings.
    ///
    /// Blank lines yield `Ok(None)`. A rejected line leaves the settings untouched.
    pub fn accept(&mut self, line: &str) -> Result<Option<HostSettings>, ServoError> {
        let merged = self.merge_line(line)?;
        if let Some(settings) = merged {
            self.settings = settings;
        }
        Ok(merged)
    }

    /// Like [`accept`](Self::accept), but the merged settings must also
    /// convert to session parameters for `servo` before they are kept.
    pub fn accept_for(
        &mut self,
        servo: &Servo,
        line: &str,
    ) -> Result<Option<(HostSettings, SessionParams)>, ServoError> {
        let Some(settings) = self.merge_line(line)? else {
            return Ok(None);
        };
        let params = servo.session_params(&settings).map_err(|e| match e {
            malformed @ ServoError::MalformedCommand(_) => malformed,
            other => ServoError::MalformedCommand(other.to_string()),
        })?;
        self.settings = settings;
        Ok(Some((settings, params)))
    }

    fn merge_line(&self, line: &str) -> Result<Option<HostSettings>, ServoError> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let params =
            parse_host_line(line).map_err(|e| ServoError::MalformedCommand(e.to_string()))?;
        let merged = self.settings.merge(&params);
        merged
            .check()
            .map_err(|e| ServoError::MalformedCommand(e.to_string()))?;
        Ok(Some(merged))
    }

    /// Read host lines until EOF, running one session per accepted line.
    ///
    /// `on_session` sees every successful report. Session failures are logged
    /// and counted; an abort or a dead actuator bus ends the loop early.
    pub fn serve<R, F>(
        &mut self,
        servo: &mut Servo,
        input: R,
        mut on_session: F,
    ) -> Result<ServeSummary>
    where
        R: BufRead,
        F: FnMut(&HostSettings, &SessionReport) -> Result<()>,
    {
        let mut summary = ServeSummary::default();
        for line in input.lines() {
            let line = line?;
            let (settings, params) = match self.accept_for(servo, &line) {
                Ok(Some(accepted)) => accepted,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "host command rejected");
                    summary.rejected += 1;
                    continue;
                }
            };
            match servo.run_session(&params) {
                Ok(report) => {
                    summary.sessions += 1;
                    on_session(&settings, &report)?;
                }
                Err(e) => {
                    summary.failed += 1;
                    let fatal = e.downcast_ref::<ServoError>().is_some_and(stops_serving);
                    warn!(error = %e, fatal, "session failed");
                    if fatal {
                        return Err(e);
                    }
                }
            }
        }
        info!(
            sessions = summary.sessions,
            rejected = summary.rejected,
            failed = summary.failed,
            "host input closed"
        );
        Ok(summary)
    }
}
