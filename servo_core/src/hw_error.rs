//! Maps `Box<dyn Error>` from trait boundaries to typed `ServoError`.
//!
//! The traits in `servo_traits` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to our typed error enum, with an optional feature-gated path
//! for `servo_hardware::HwError` downcasting.

use crate::error::ServoError;

/// Which seam the error crossed; decides the fallback variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seam {
    Bus,
    Encoder,
}

/// Map a trait-boundary error to a typed `ServoError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static), seam: Seam) -> ServoError {
    #[cfg(feature = "hardware-errors")]
    {
        use servo_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>()
            && matches!(hw, HwError::BusBusy | HwError::NotLocked)
        {
            return ServoError::BusUnavailable;
        }
    }

    let s = e.to_string();
    match seam {
        Seam::Bus => ServoError::ActuatorWrite(s),
        Seam::Encoder => ServoError::Encoder(s),
    }
}
