//! Quadrature decoding shared by the GPIO encoder and its tests.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// Count delta for every (previous, next) pair of 2-bit `AB` states.
/// Invalid double transitions (both lines flipped) contribute nothing.
const QUADRATURE_TABLE: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

/// Pack channel levels into a 2-bit state `0bAB`.
#[inline]
pub fn quadrature_state(a: bool, b: bool) -> u8 {
    (u8::from(a) << 1) | u8::from(b)
}

/// Signed count change for one observed transition (x4 decoding).
#[inline]
pub fn quadrature_step(prev: u8, next: u8) -> i8 {
    QUADRATURE_TABLE[usize::from(((prev & 0b11) << 2) | (next & 0b11))]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    A,
    B,
}

/// Lock-free x4 quadrature counter fed from per-channel edge callbacks.
///
/// Each channel callback may run on its own thread; the packed `AB` state is
/// updated with a single compare-and-swap so the two never tear.
#[derive(Debug)]
pub struct QuadratureCounter {
    state: AtomicU8,
    count: AtomicI32,
}

impl QuadratureCounter {
    pub fn new(a: bool, b: bool) -> Self {
        Self {
            state: AtomicU8::new(quadrature_state(a, b)),
            count: AtomicI32::new(0),
        }
    }

    pub fn on_edge(&self, channel: Channel, high: bool) {
        let bit = u8::from(high);
        let next_of = |prev: u8| match channel {
            Channel::A => (prev & 0b01) | (bit << 1),
            Channel::B => (prev & 0b10) | bit,
        };
        let prev = match self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some(next_of(p)))
        {
            Ok(p) | Err(p) => p,
        };
        let delta = quadrature_step(prev, next_of(prev));
        if delta != 0 {
            self.count.fetch_add(i32::from(delta), Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_transition_is_ignored() {
        assert_eq!(quadrature_step(0b00, 0b11), 0);
        assert_eq!(quadrature_step(0b01, 0b10), 0);
    }

    #[test]
    fn no_change_is_zero() {
        for s in 0..4 {
            assert_eq!(quadrature_step(s, s), 0);
        }
    }
}
