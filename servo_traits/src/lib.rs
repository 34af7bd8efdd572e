pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Boxed error used at every hardware seam.
pub type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Quadrature encoder yielding an accumulated signed count.
pub trait Encoder {
    fn position(&mut self) -> HwResult<i32>;
}

/// Clock phase / polarity pair for a synchronous serial bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMode {
    pub phase: u8,
    pub polarity: u8,
}

impl BusMode {
    /// CPOL = 0, CPHA = 1 (data sampled on the falling edge).
    pub const MODE_1: BusMode = BusMode {
        phase: 1,
        polarity: 0,
    };
}

/// Exclusive synchronous serial bus.
///
/// `try_lock` must be called (and succeed) before `configure` or `write`.
pub trait SpiBus {
    fn try_lock(&mut self) -> bool;
    fn configure(&mut self, mode: BusMode) -> HwResult<()>;
    fn write(&mut self, bytes: &[u8]) -> HwResult<()>;
    fn unlock(&mut self);
}

/// Active-low device select line.
pub trait ChipSelect {
    fn select(&mut self) -> HwResult<()>;
    fn deselect(&mut self) -> HwResult<()>;
}

impl<T: Encoder + ?Sized> Encoder for Box<T> {
    fn position(&mut self) -> HwResult<i32> {
        (**self).position()
    }
}

impl<T: SpiBus + ?Sized> SpiBus for Box<T> {
    fn try_lock(&mut self) -> bool {
        (**self).try_lock()
    }
    fn configure(&mut self, mode: BusMode) -> HwResult<()> {
        (**self).configure(mode)
    }
    fn write(&mut self, bytes: &[u8]) -> HwResult<()> {
        (**self).write(bytes)
    }
    fn unlock(&mut self) {
        (**self).unlock();
    }
}

impl<T: ChipSelect + ?Sized> ChipSelect for Box<T> {
    fn select(&mut self) -> HwResult<()> {
        (**self).select()
    }
    fn deselect(&mut self) -> HwResult<()> {
        (**self).deselect()
    }
}
