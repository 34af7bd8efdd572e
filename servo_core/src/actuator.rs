//! AD5293 digital potentiometer driver.
//!
//! Commands in `[-1, 1]` map onto the 10-bit wiper register `[0, 1023]`.
//! Each register write is one 2-byte frame `[(reg >> 8) | 0x04, reg & 0xFF]`
//! sent with chip select held low for that transfer only.

use servo_traits::{BusMode, ChipSelect, SpiBus};
use tracing::{debug, error, info, warn};

use crate::config::TransformKind;
use crate::error::ServoError;
use crate::hw_error::{Seam, map_hw_error};
use crate::status::ShutdownReport;

pub const REGISTER_MIN: u16 = 0;
pub const REGISTER_MAX: u16 = 0x3FF;

/// Control bits for "write RDAC" in the frame's high byte.
const WRITE_RDAC: u8 = 0x04;

/// Device bring-up frames sent once the bus is configured: unlock RDAC writes,
/// then park the wiper near midscale.
pub const INIT_FRAMES: [[u8; 2]; 2] = [[0x1b, 0xff], [0x06, 0x02]];

/// `clamp(round(511.5 * v + 0.5) + 511, 0, 1023)` with `v` clamped to
/// `[-1, 1]` first. NaN is treated as 0.
#[inline]
pub fn affine_register(v: f64) -> u16 {
    let v = if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) };
    let r = (511.5 * v + 0.5).round() + 511.0;
    r.clamp(f64::from(REGISTER_MIN), f64::from(REGISTER_MAX)) as u16
}

/// Encode a register as a write-RDAC frame. Out-of-range registers are clamped.
#[inline]
pub fn frame(register: u16) -> [u8; 2] {
    let r = register.min(REGISTER_MAX);
    [((r >> 8) as u8) | WRITE_RDAC, (r & 0xFF) as u8]
}

/// Precomputed affine transform sampled at `resolution` steps across `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct LookupTable {
    table: Vec<u16>,
    resolution: u32,
}

impl LookupTable {
    pub fn new(resolution: u32) -> Self {
        let resolution = resolution.max(2);
        let step = 2.0 / f64::from(resolution);
        let table = (0..=resolution)
            .map(|i| affine_register(-1.0 + step * f64::from(i)))
            .collect();
        Self { table, resolution }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    #[inline]
    pub fn register(&self, v: f64) -> u16 {
        let v = if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) };
        let idx = ((v + 1.0) * 0.5 * f64::from(self.resolution)).round() as usize;
        self.table[idx.min(self.table.len() - 1)]
    }
}

#[derive(Debug, Clone)]
pub enum Transform {
    Affine,
    Lookup(LookupTable),
}

impl Transform {
    #[inline]
    pub fn register(&self, v: f64) -> u16 {
        match self {
            Transform::Affine => affine_register(v),
            Transform::Lookup(t) => t.register(v),
        }
    }
}

impl From<TransformKind> for Transform {
    fn from(kind: TransformKind) -> Self {
        match kind {
            TransformKind::Affine => Transform::Affine,
            TransformKind::Lookup { resolution } => Transform::Lookup(LookupTable::new(resolution)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Ready,
    /// Bus never came up or the driver was shut down; nothing reaches the wire.
    Disabled,
}

pub struct Digipot<B: SpiBus, C: ChipSelect> {
    bus: B,
    cs: C,
    transform: Transform,
    state: DriverState,
    init_error: Option<ServoError>,
    last_register: Option<u16>,
    shut_down: bool,
}

impl<B: SpiBus, C: ChipSelect> core::fmt::Debug for Digipot<B, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Digipot")
            .field("state", &self.state)
            .field("last_register", &self.last_register)
            .finish()
    }
}

impl<B: SpiBus, C: ChipSelect> Digipot<B, C> {
    /// Lock and configure the bus (up to `attempts` tries), then run the
    /// device init sequence. On failure the driver comes up `Disabled`
    /// and `init_error` records why.
    pub fn new(bus: B, cs: C, transform: Transform, attempts: u32) -> Self {
        let mut pot = Self {
            bus,
            cs,
            transform,
            state: DriverState::Disabled,
            init_error: None,
            last_register: None,
            shut_down: false,
        };
        pot.init(attempts.max(1));
        pot
    }

    fn init(&mut self, attempts: u32) {
        for attempt in 1..=attempts {
            if !self.bus.try_lock() {
                warn!(attempt, attempts, "spi bus lock failed");
                continue;
            }
            match self.bus.configure(BusMode::MODE_1) {
                Ok(()) => {
                    self.state = DriverState::Ready;
                    break;
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "spi bus configure failed");
                    self.bus.unlock();
                }
            }
        }
        if self.state != DriverState::Ready {
            error!(attempts, "spi bus failed to initialize; actuator disabled");
            self.init_error = Some(ServoError::BusInitFailure { attempts });
            return;
        }
        info!("spi bus initialized");

        for f in INIT_FRAMES {
            if let Err(e) = self.transfer(f) {
                error!(error = %e, "digipot init sequence failed; actuator disabled");
                self.bus.unlock();
                self.state = DriverState::Disabled;
                self.init_error = Some(e);
                return;
            }
        }
        debug!("digipot initialized");
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn init_error(&self) -> Option<&ServoError> {
        self.init_error.as_ref()
    }

    /// Register most recently put on the wire.
    pub fn last_register(&self) -> Option<u16> {
        self.last_register
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Transform a normalized command and write it. Returns the register sent.
    pub fn set_normalized(&mut self, v: f64) -> Result<u16, ServoError> {
        let register = self.transform.register(v);
        self.write_frame(register)
    }

    /// Write a register directly, bypassing the transform.
    pub fn set_raw(&mut self, register: u16) -> Result<u16, ServoError> {
        self.write_frame(register)
    }

    pub fn zero(&mut self) -> Result<u16, ServoError> {
        self.set_normalized(0.0)
    }

    /// Clamp, frame and send one register.
    pub fn write_frame(&mut self, register: u16) -> Result<u16, ServoError> {
        if self.state == DriverState::Disabled {
            error!(register, "actuator write rejected: bus unavailable");
            return Err(ServoError::BusUnavailable);
        }
        let register = register.min(REGISTER_MAX);
        self.transfer(frame(register))?;
        self.last_register = Some(register);
        Ok(register)
    }

    fn transfer(&mut self, bytes: [u8; 2]) -> Result<(), ServoError> {
        self.cs
            .select()
            .map_err(|e| map_hw_error(e.as_ref(), Seam::Bus))?;
        let sent = self
            .bus
            .write(&bytes)
            .map_err(|e| map_hw_error(e.as_ref(), Seam::Bus));
        let released = self
            .cs
            .deselect()
            .map_err(|e| map_hw_error(e.as_ref(), Seam::Bus));
        sent?;
        released
    }

    /// Zero the output and release the bus. Idempotent; a second call
    /// returns an empty report.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down {
            return report;
        }
        self.shut_down = true;
        if self.state == DriverState::Ready {
            if let Err(e) = self.zero() {
                report.record("actuator", e);
            }
            self.bus.unlock();
        }
        self.state = DriverState::Disabled;
        report
    }
}

impl<B: SpiBus, C: ChipSelect> Drop for Digipot<B, C> {
    fn drop(&mut self) {
        let report = self.shutdown();
        if !report.is_clean() {
            warn!(?report, "digipot shutdown on drop reported failures");
        }
    }
}
