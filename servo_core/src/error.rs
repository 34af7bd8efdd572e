use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServoError {
    #[error("spi bus failed to initialize after {attempts} attempt(s)")]
    BusInitFailure { attempts: u32 },
    #[error("actuator disabled: spi bus unavailable")]
    BusUnavailable,
    #[error("actuator write failed: {0}")]
    ActuatorWrite(String),
    #[error("malformed host command: {0}")]
    MalformedCommand(String),
    #[error("zero time interval between samples")]
    ZeroInterval,
    #[error("insufficient sample history: need {needed}, have {available}")]
    InsufficientHistory { needed: usize, available: usize },
    #[error("task '{0}' is already registered")]
    DuplicateName(String),
    #[error("calibration gave up after {ticks} ticks without rotor movement")]
    CalibrationTimeout { ticks: u32 },
    #[error("encoder error: {0}")]
    Encoder(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("aborted by operator")]
    Aborted,
}

impl ServoError {
    /// True for errors that end a session rather than skip a single tick.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ServoError::ZeroInterval | ServoError::InsufficientHistory { .. }
        )
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing encoder")]
    MissingEncoder,
    #[error("missing actuator bus")]
    MissingBus,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T, E = Report> = std::result::Result<T, E>;
pub use eyre::Report;
