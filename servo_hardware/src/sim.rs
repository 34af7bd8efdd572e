//! Simulated plant: a motor with a deadzone driven through a digipot.
//!
//! The bus, chip select and encoder returned by [`SimulatedRig::split`] share
//! one rotor state. Wiper writes arriving on the bus change the rotor speed;
//! the encoder integrates that speed over the rig clock.

use servo_traits::{BusMode, ChipSelect, Clock, Encoder, HwResult, SpiBus};
use std::cell::RefCell;
use std::f64::consts::TAU;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::error::HwError;

/// Wiper centre of a 10-bit pot (`[0, 1023]`).
const WIPER_CENTER: f64 = 511.5;
/// AD5293 command nibble for "write RDAC" (bits 13..10 of the frame).
const CMD_WRITE_RDAC: u16 = 0x1;

/// Physical parameters of the simulated motor.
#[derive(Debug, Clone, Copy)]
pub struct RotorModel {
    pub counts_per_rev: u32,
    /// Normalized command magnitude that must be exceeded before the rotor turns.
    pub deadzone: f64,
    /// Shaft speed at full command, rad/s.
    pub max_rad_s: f64,
}

impl Default for RotorModel {
    fn default() -> Self {
        Self {
            counts_per_rev: 2000,
            deadzone: 0.1,
            max_rad_s: 60.0,
        }
    }
}

impl RotorModel {
    /// Steady-state speed in counts/s for a normalized command.
    pub fn counts_per_sec(&self, command: f64) -> f64 {
        let mag = command.abs();
        if mag <= self.deadzone {
            return 0.0;
        }
        let span = (1.0 - self.deadzone).max(f64::EPSILON);
        let rad_s = command.signum() * ((mag - self.deadzone) / span) * self.max_rad_s;
        rad_s * f64::from(self.counts_per_rev) / TAU
    }
}

#[derive(Debug)]
struct RotorState {
    model: RotorModel,
    position: f64,
    counts_per_sec: f64,
    last_update: Instant,
    wiper: u16,
    locked: bool,
    mode: Option<BusMode>,
    selected: bool,
    frames: Vec<[u8; 2]>,
    lock_failures_left: u32,
}

impl RotorState {
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.position += self.counts_per_sec * dt;
        self.last_update = now;
    }
}

/// Handle onto the shared simulated plant. Cloning shares state.
#[derive(Clone)]
pub struct SimulatedRig {
    state: Rc<RefCell<RotorState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SimulatedRig {
    pub fn new(model: RotorModel, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let now = clock.now();
        Self {
            state: Rc::new(RefCell::new(RotorState {
                model,
                position: 0.0,
                counts_per_sec: 0.0,
                last_update: now,
                wiper: 512,
                locked: false,
                mode: None,
                selected: false,
                frames: Vec::new(),
                lock_failures_left: 0,
            })),
            clock,
        }
    }

    /// Make the next `n` lock attempts fail, as if another owner held the bus.
    pub fn fail_next_locks(&self, n: u32) {
        self.state.borrow_mut().lock_failures_left = n;
    }

    pub fn split(&self) -> (SimulatedBus, SimulatedChipSelect, SimulatedEncoder) {
        (
            SimulatedBus { rig: self.clone() },
            SimulatedChipSelect { rig: self.clone() },
            SimulatedEncoder { rig: self.clone() },
        )
    }

    /// Every frame that reached the device while selected.
    pub fn frames(&self) -> Vec<[u8; 2]> {
        self.state.borrow().frames.clone()
    }

    pub fn wiper(&self) -> u16 {
        self.state.borrow().wiper
    }

    pub fn bus_mode(&self) -> Option<BusMode> {
        self.state.borrow().mode
    }

    pub fn is_locked(&self) -> bool {
        self.state.borrow().locked
    }
}

pub struct SimulatedBus {
    rig: SimulatedRig,
}

impl SpiBus for SimulatedBus {
    fn try_lock(&mut self) -> bool {
        let mut st = self.rig.state.borrow_mut();
        if st.lock_failures_left > 0 {
            st.lock_failures_left -= 1;
            return false;
        }
        st.locked = true;
        true
    }

    fn configure(&mut self, mode: BusMode) -> HwResult<()> {
        let mut st = self.rig.state.borrow_mut();
        if !st.locked {
            return Err(Box::new(HwError::NotLocked));
        }
        st.mode = Some(mode);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> HwResult<()> {
        let now = self.rig.clock.now();
        let mut st = self.rig.state.borrow_mut();
        if !st.locked {
            return Err(Box::new(HwError::NotLocked));
        }
        if !st.selected {
            tracing::trace!(len = bytes.len(), "sim bus: write without select ignored");
            return Ok(());
        }
        let [msb, lsb] = match bytes {
            [a, b] => [*a, *b],
            _ => {
                return Err(Box::new(HwError::Bus(format!(
                    "device expects 2-byte frames, got {}",
                    bytes.len()
                ))));
            }
        };
        st.frames.push([msb, lsb]);
        let word = (u16::from(msb) << 8) | u16::from(lsb);
        if (word >> 10) & 0x0F == CMD_WRITE_RDAC {
            st.advance(now);
            st.wiper = word & 0x03FF;
            let command = (f64::from(st.wiper) - WIPER_CENTER) / WIPER_CENTER;
            let speed = st.model.counts_per_sec(command);
            st.counts_per_sec = speed;
        }
        Ok(())
    }

    fn unlock(&mut self) {
        self.rig.state.borrow_mut().locked = false;
    }
}

pub struct SimulatedChipSelect {
    rig: SimulatedRig,
}

impl ChipSelect for SimulatedChipSelect {
    fn select(&mut self) -> HwResult<()> {
        self.rig.state.borrow_mut().selected = true;
        Ok(())
    }

    fn deselect(&mut self) -> HwResult<()> {
        self.rig.state.borrow_mut().selected = false;
        Ok(())
    }
}

pub struct SimulatedEncoder {
    rig: SimulatedRig,
}

impl Encoder for SimulatedEncoder {
    fn position(&mut self) -> HwResult<i32> {
        let now = self.rig.clock.now();
        let mut st = self.rig.state.borrow_mut();
        st.advance(now);
        let counts = st.position.floor();
        Ok(counts.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_traits::ManualClock;
    use std::time::Duration;

    fn rig() -> (SimulatedRig, ManualClock) {
        let clock = ManualClock::new();
        let rig = SimulatedRig::new(RotorModel::default(), Arc::new(clock.clone()));
        (rig, clock)
    }

    #[test]
    fn rotor_holds_still_inside_deadzone() {
        let model = RotorModel::default();
        assert_eq!(model.counts_per_sec(0.05), 0.0);
        assert_eq!(model.counts_per_sec(-0.1), 0.0);
        assert!(model.counts_per_sec(0.5) > 0.0);
        assert!(model.counts_per_sec(-0.5) < 0.0);
    }

    #[test]
    fn wiper_write_spins_rotor() {
        let (rig, clock) = rig();
        let (mut bus, mut cs, mut enc) = rig.split();
        assert!(bus.try_lock());
        bus.configure(BusMode::MODE_1).unwrap();
        cs.select().unwrap();
        // 0x07 0xff: write RDAC, full scale
        bus.write(&[0x07, 0xff]).unwrap();
        cs.deselect().unwrap();
        assert_eq!(rig.wiper(), 1023);

        clock.advance(Duration::from_secs(1));
        let pos = enc.position().unwrap();
        let expected = RotorModel::default().counts_per_sec(1.0);
        assert!((f64::from(pos) - expected).abs() <= 1.0, "pos={pos}");
    }

    #[test]
    fn unselected_frames_never_reach_device() {
        let (rig, _clock) = rig();
        let (mut bus, _cs, _enc) = rig.split();
        assert!(bus.try_lock());
        bus.write(&[0x07, 0xff]).unwrap();
        assert!(rig.frames().is_empty());
        assert_eq!(rig.wiper(), 512);
    }

    #[test]
    fn lock_failures_are_scripted() {
        let (rig, _clock) = rig();
        rig.fail_next_locks(2);
        let (mut bus, _cs, _enc) = rig.split();
        assert!(!bus.try_lock());
        assert!(!bus.try_lock());
        assert!(bus.try_lock());
        assert!(rig.is_locked());
    }
}
