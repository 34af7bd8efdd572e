use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("spi bus error: {0}")]
    Bus(String),
    #[error("spi bus busy (lock held elsewhere)")]
    BusBusy,
    #[error("spi bus not locked")]
    NotLocked,
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
