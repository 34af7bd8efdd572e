//! Test and helper mocks for servo_core.
//!
//! The bus and chip select share a [`BusLog`] so tests can assert on the
//! exact sequence of lock, select, write and deselect events.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use servo_traits::{BusMode, ChipSelect, Clock, Encoder, HwResult, SpiBus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Lock,
    Configure(BusMode),
    Select,
    Write(Vec<u8>),
    Deselect,
    Unlock,
}

#[derive(Debug, Default)]
pub struct BusLog {
    pub events: Vec<BusEvent>,
    /// Remaining lock attempts that should fail.
    pub lock_failures: u32,
    /// Fail every write once this many writes have succeeded.
    pub fail_writes_after: Option<usize>,
    writes: usize,
}

impl BusLog {
    pub fn shared() -> Rc<RefCell<BusLog>> {
        Rc::new(RefCell::new(BusLog::default()))
    }

    /// All written frames, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Write(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    /// Register carried by the last write-RDAC frame, if any.
    pub fn last_register(&self) -> Option<u16> {
        self.frames().iter().rev().find_map(|f| match f.as_slice() {
            [msb, lsb] if msb & 0xFC == 0x04 => {
                Some((u16::from(msb & 0x03) << 8) | u16::from(*lsb))
            }
            _ => None,
        })
    }
}

pub struct RecordingBus {
    log: Rc<RefCell<BusLog>>,
}

impl RecordingBus {
    pub fn new(log: Rc<RefCell<BusLog>>) -> Self {
        Self { log }
    }
}

impl SpiBus for RecordingBus {
    fn try_lock(&mut self) -> bool {
        let mut log = self.log.borrow_mut();
        if log.lock_failures > 0 {
            log.lock_failures -= 1;
            return false;
        }
        log.events.push(BusEvent::Lock);
        true
    }

    fn configure(&mut self, mode: BusMode) -> HwResult<()> {
        self.log.borrow_mut().events.push(BusEvent::Configure(mode));
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> HwResult<()> {
        let mut log = self.log.borrow_mut();
        if log.fail_writes_after.is_some_and(|n| log.writes >= n) {
            return Err(Box::new(std::io::Error::other("bus write failed")));
        }
        log.writes += 1;
        log.events.push(BusEvent::Write(bytes.to_vec()));
        Ok(())
    }

    fn unlock(&mut self) {
        self.log.borrow_mut().events.push(BusEvent::Unlock);
    }
}

pub struct RecordingChipSelect {
    log: Rc<RefCell<BusLog>>,
}

impl RecordingChipSelect {
    pub fn new(log: Rc<RefCell<BusLog>>) -> Self {
        Self { log }
    }
}

impl ChipSelect for RecordingChipSelect {
    fn select(&mut self) -> HwResult<()> {
        self.log.borrow_mut().events.push(BusEvent::Select);
        Ok(())
    }

    fn deselect(&mut self) -> HwResult<()> {
        self.log.borrow_mut().events.push(BusEvent::Deselect);
        Ok(())
    }
}

/// Encoder that reads 0 until the pot register reaches `threshold`, then
/// jumps to `moved`. Models a rotor with a sharp breakaway point.
pub struct BreakawayEncoder {
    log: Rc<RefCell<BusLog>>,
    threshold: u16,
    moved: i32,
}

impl BreakawayEncoder {
    pub fn new(log: Rc<RefCell<BusLog>>, threshold: u16, moved: i32) -> Self {
        Self {
            log,
            threshold,
            moved,
        }
    }
}

impl Encoder for BreakawayEncoder {
    fn position(&mut self) -> HwResult<i32> {
        let moving = self
            .log
            .borrow()
            .last_register()
            .is_some_and(|r| r >= self.threshold);
        Ok(if moving { self.moved } else { 0 })
    }
}

/// Encoder spinning at a fixed rate regardless of the actuator.
pub struct ConstantSpeedEncoder {
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    counts_per_sec: f64,
}

impl ConstantSpeedEncoder {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>, counts_per_sec: f64) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            epoch,
            counts_per_sec,
        }
    }
}

impl Encoder for ConstantSpeedEncoder {
    fn position(&mut self) -> HwResult<i32> {
        let t = self.clock.now().saturating_duration_since(self.epoch);
        Ok((self.counts_per_sec * t.as_secs_f64()).floor() as i32)
    }
}

/// Encoder that always fails.
pub struct FailingEncoder;

impl Encoder for FailingEncoder {
    fn position(&mut self) -> HwResult<i32> {
        Err(Box::new(std::io::Error::other("encoder unplugged")))
    }
}
