//! Host parameter intake: one JSON object per line, every field optional.
//!
//! Absent fields fall back to the value in effect for the previous session.
//! Field names and units are the host protocol's own (`Kp`/`Ki`/`Kd` are
//! capitalized on the wire).
use serde::Deserialize;
use serde_json::Value;

use crate::SessionDefaults;

/// Accepted session length, in seconds.
pub const TIME_LIMIT_RANGE: std::ops::RangeInclusive<f64> = 1e-3..=86_400.0;
/// Accepted control loop rate, in Hz.
pub const RATE_RANGE: std::ops::RangeInclusive<f64> = 1e-3..=1e6;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostParamError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("no recognized parameter in message")]
    NoRecognizedFields,
    #[error("{field} {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

/// One parsed host line. `None` means "keep the previous value".
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct HostParams {
    pub target: Option<f64>,
    pub time_limit: Option<f64>,
    pub rate: Option<f64>,
    pub bias: Option<f64>,
    #[serde(rename = "Kp")]
    pub kp: Option<f64>,
    #[serde(rename = "Ki")]
    pub ki: Option<f64>,
    #[serde(rename = "Kd")]
    pub kd: Option<f64>,
}

impl HostParams {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Fully-resolved host settings for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSettings {
    /// rad/s in velocity mode, degrees in angle mode.
    pub target: f64,
    /// Session duration in seconds.
    pub time_limit: f64,
    /// Control loop rate in Hz.
    pub rate: f64,
    /// Raw bias in pot units (-512..=512); normalized by /512.
    pub bias: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self::from(&SessionDefaults::default())
    }
}

impl From<&SessionDefaults> for HostSettings {
    fn from(d: &SessionDefaults) -> Self {
        Self {
            target: d.target,
            time_limit: d.time_limit,
            rate: d.rate,
            bias: d.bias,
            kp: d.kp,
            ki: d.ki,
            kd: d.kd,
        }
    }
}

impl HostSettings {
    /// Overlay the fields present in `p`; absent ones keep `self`'s value.
    #[must_use]
    pub fn merge(&self, p: &HostParams) -> Self {
        Self {
            target: p.target.unwrap_or(self.target),
            time_limit: p.time_limit.unwrap_or(self.time_limit),
            rate: p.rate.unwrap_or(self.rate),
            bias: p.bias.unwrap_or(self.bias),
            kp: p.kp.unwrap_or(self.kp),
            ki: p.ki.unwrap_or(self.ki),
            kd: p.kd.unwrap_or(self.kd),
        }
    }

    pub fn check(&self) -> Result<(), HostParamError> {
        let finite = [
            ("target", self.target),
            ("bias", self.bias),
            ("Kp", self.kp),
            ("Ki", self.ki),
            ("Kd", self.kd),
        ];
        for (field, v) in finite {
            if !v.is_finite() {
                return Err(HostParamError::InvalidValue {
                    field,
                    reason: "must be finite",
                });
            }
        }
        if !TIME_LIMIT_RANGE.contains(&self.time_limit) {
            return Err(HostParamError::InvalidValue {
                field: "time_limit",
                reason: "must be within [0.001, 86400] s",
            });
        }
        if !RATE_RANGE.contains(&self.rate) {
            return Err(HostParamError::InvalidValue {
                field: "rate",
                reason: "must be within [0.001, 1000000] Hz",
            });
        }
        if !(-512.0..=512.0).contains(&self.bias) {
            return Err(HostParamError::InvalidValue {
                field: "bias",
                reason: "must be within [-512, 512]",
            });
        }
        Ok(())
    }
}

/// Parse one host line. Blank lines are rejected like any other malformed
/// input; the caller decides whether to skip them.
pub fn parse_host_line(line: &str) -> Result<HostParams, HostParamError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| HostParamError::Json(e.to_string()))?;
    if !value.is_object() {
        return Err(HostParamError::NotAnObject);
    }
    let params: HostParams =
        serde_json::from_value(value).map_err(|e| HostParamError::Json(e.to_string()))?;
    if params.is_empty() {
        return Err(HostParamError::NoRecognizedFields);
    }
    Ok(params)
}
