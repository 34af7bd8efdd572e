//! Hardware backends for the servo: a simulated plant that always builds, and
//! Raspberry Pi SPI/GPIO drivers behind the `hardware` feature.

pub mod error;
pub mod sim;
pub mod util;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;

pub use sim::{RotorModel, SimulatedBus, SimulatedChipSelect, SimulatedEncoder, SimulatedRig};
