//! Raspberry Pi backends: spidev bus, GPIO chip select, GPIO quadrature encoder.

use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use servo_traits::{BusMode, ChipSelect, Encoder, HwResult, SpiBus};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{HwError, Result};
use crate::util::{Channel, QuadratureCounter};

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

fn bus_from_index(index: u8) -> Result<Bus> {
    Ok(match index {
        0 => Bus::Spi0,
        1 => Bus::Spi1,
        2 => Bus::Spi2,
        3 => Bus::Spi3,
        4 => Bus::Spi4,
        5 => Bus::Spi5,
        6 => Bus::Spi6,
        other => return Err(HwError::Bus(format!("no SPI bus {other}"))),
    })
}

fn slave_select_from_index(index: u8) -> Result<SlaveSelect> {
    Ok(match index {
        0 => SlaveSelect::Ss0,
        1 => SlaveSelect::Ss1,
        2 => SlaveSelect::Ss2,
        other => return Err(HwError::Bus(format!("no slave select {other}"))),
    })
}

/// spidev-backed bus. The device node is opened on `try_lock` and closed on
/// `unlock`; an open node is the lock.
pub struct RppalBus {
    bus: Bus,
    slave_select: SlaveSelect,
    clock_hz: u32,
    spi: Option<Spi>,
}

impl RppalBus {
    pub fn new(bus: u8, slave_select: u8, clock_hz: u32) -> Result<Self> {
        Ok(Self {
            bus: bus_from_index(bus)?,
            slave_select: slave_select_from_index(slave_select)?,
            clock_hz,
            spi: None,
        })
    }
}

impl SpiBus for RppalBus {
    fn try_lock(&mut self) -> bool {
        if self.spi.is_some() {
            return true;
        }
        match Spi::new(self.bus, self.slave_select, self.clock_hz, Mode::Mode1) {
            Ok(spi) => {
                self.spi = Some(spi);
                true
            }
            Err(e) => {
                warn!(error = %e, "spidev open failed");
                false
            }
        }
    }

    fn configure(&mut self, mode: BusMode) -> HwResult<()> {
        let spi = self.spi.as_mut().ok_or(HwError::NotLocked)?;
        let mode = match (mode.polarity, mode.phase) {
            (0, 0) => Mode::Mode0,
            (0, 1) => Mode::Mode1,
            (1, 0) => Mode::Mode2,
            (1, 1) => Mode::Mode3,
            (cpol, cpha) => {
                return Err(Box::new(HwError::Bus(format!(
                    "invalid bus mode cpol={cpol} cpha={cpha}"
                ))));
            }
        };
        spi.set_mode(mode)
            .map_err(|e| HwError::Bus(e.to_string()))?;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> HwResult<()> {
        let spi = self.spi.as_mut().ok_or(HwError::NotLocked)?;
        let n = spi.write(bytes).map_err(|e| HwError::Bus(e.to_string()))?;
        if n != bytes.len() {
            return Err(Box::new(HwError::Bus(format!(
                "short write: {n} of {} bytes",
                bytes.len()
            ))));
        }
        Ok(())
    }

    fn unlock(&mut self) {
        if self.spi.take().is_some() {
            debug!("spidev released");
        }
    }
}

/// Active-low GPIO chip select, idle high.
pub struct GpioChipSelect {
    pin: OutputPin,
}

impl GpioChipSelect {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let mut pin = gpio.get(pin).map_err(gpio_err)?.into_output();
        pin.set_high();
        Ok(Self { pin })
    }
}

impl ChipSelect for GpioChipSelect {
    fn select(&mut self) -> HwResult<()> {
        self.pin.set_low();
        Ok(())
    }

    fn deselect(&mut self) -> HwResult<()> {
        self.pin.set_high();
        Ok(())
    }
}

/// Two-channel quadrature encoder decoded from GPIO edge interrupts.
pub struct QuadratureEncoder {
    _a: InputPin,
    _b: InputPin,
    counter: Arc<QuadratureCounter>,
}

impl QuadratureEncoder {
    pub fn new(a_pin: u8, b_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let mut a = gpio.get(a_pin).map_err(gpio_err)?.into_input_pullup();
        let mut b = gpio.get(b_pin).map_err(gpio_err)?.into_input_pullup();
        let counter = Arc::new(QuadratureCounter::new(a.is_high(), b.is_high()));

        let ca = counter.clone();
        a.set_async_interrupt(Trigger::Both, move |level: Level| {
            ca.on_edge(Channel::A, level == Level::High);
        })
        .map_err(gpio_err)?;
        let cb = counter.clone();
        b.set_async_interrupt(Trigger::Both, move |level: Level| {
            cb.on_edge(Channel::B, level == Level::High);
        })
        .map_err(gpio_err)?;

        Ok(Self {
            _a: a,
            _b: b,
            counter,
        })
    }
}

impl Encoder for QuadratureEncoder {
    fn position(&mut self) -> HwResult<i32> {
        Ok(self.counter.count())
    }
}
