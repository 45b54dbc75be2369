//! Fixed-capacity circular history buffer
//!
//! Holds the most recent `len` written values. The active length can be
//! changed off the audio thread; storage is reserved once for `N` values.

use crate::{ConvError, ConvResult};

/// Circular history of up to `N` values (`N` must be a power of two)
pub struct StaticRingBuffer<T, const N: usize> {
    data: Box<[T]>,
    /// Number of values addressable through `get`
    len: usize,
    /// Power-of-two window actually cycled through (>= len)
    size: usize,
    mask: usize,
    /// Next write position
    pos: usize,
}

impl<T: Copy + Default, const N: usize> StaticRingBuffer<T, N> {
    const CAPACITY: usize = {
        assert!(N.is_power_of_two(), "StaticRingBuffer capacity must be a power of two");
        N
    };

    /// Create a buffer with active length `len`
    pub fn new(len: usize) -> ConvResult<Self> {
        let mut buffer = Self {
            data: vec![T::default(); Self::CAPACITY].into_boxed_slice(),
            len: 0,
            size: 1,
            mask: 0,
            pos: 0,
        };
        buffer.set_len(len)?;
        Ok(buffer)
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Change the active length and clear the history
    pub fn set_len(&mut self, len: usize) -> ConvResult<()> {
        if len > N {
            return Err(ConvError::ImpulseTooLong { len, max: N });
        }
        self.len = len;
        self.size = len.max(1).next_power_of_two();
        self.mask = self.size - 1;
        self.clear();
        Ok(())
    }

    /// Write the next value, overwriting the oldest once full
    #[inline]
    pub fn push(&mut self, value: T) {
        self.data[self.pos] = value;
        self.pos = (self.pos + 1) & self.mask;
    }

    /// Value written `age` pushes ago (0 = most recent)
    #[inline]
    pub fn get(&self, age: usize) -> T {
        debug_assert!(age < self.size);
        self.data[(self.pos + self.size - 1 - age) & self.mask]
    }

    /// Reset the history to `T::default()`
    pub fn clear(&mut self) {
        self.data[..self.size].fill(T::default());
        self.pos = 0;
    }
}

impl<const N: usize> StaticRingBuffer<f64, N> {
    /// Dot product of the history with `taps` (`taps[0]` meets the newest value)
    #[inline]
    pub fn dot(&self, taps: &[f64]) -> f64 {
        debug_assert!(taps.len() <= self.size);
        let newest = (self.pos + self.size - 1) & self.mask;

        // The history runs backwards from `newest`; split into the two
        // contiguous runs before and after the wrap point.
        let head = (newest + 1).min(taps.len());
        let mut acc = 0.0;
        for (tap, x) in taps[..head].iter().zip(self.data[..=newest].iter().rev()) {
            acc += tap * x;
        }
        for (tap, x) in taps[head..]
            .iter()
            .zip(self.data[..self.size].iter().rev())
        {
            acc += tap * x;
        }
        acc
    }
}
