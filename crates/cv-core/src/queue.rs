//! Fixed-capacity FIFO queue
//!
//! Storage is reserved once at construction and never resized, so every
//! push/pop is allocation-free and safe to call from the audio thread.

/// Bounded FIFO of `N` elements (`N` must be a power of two)
///
/// Push on a full queue is rejected and hands the value back; the queued
/// entries are left untouched.
pub struct StaticQueue<T, const N: usize> {
    data: Box<[T]>,
    /// Index of the oldest element
    head: usize,
    len: usize,
}

impl<T: Copy + Default, const N: usize> StaticQueue<T, N> {
    const MASK: usize = {
        assert!(N.is_power_of_two(), "StaticQueue capacity must be a power of two");
        N - 1
    };

    /// Create an empty queue with all `N` slots reserved
    pub fn new() -> Self {
        let _ = Self::MASK;
        Self {
            data: vec![T::default(); N].into_boxed_slice(),
            head: 0,
            len: 0,
        }
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

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Free slots
    #[inline]
    pub fn available(&self) -> usize {
        N - self.len
    }

    /// Append one element, or return it if the queue is full
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        let tail = (self.head + self.len) & Self::MASK;
        self.data[tail] = value;
        self.len += 1;
        Ok(())
    }

    /// Remove the oldest element
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.data[self.head];
        self.head = (self.head + 1) & Self::MASK;
        self.len -= 1;
        Some(value)
    }

    /// Element at `index` counted from the oldest
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        Some(&self.data[(self.head + index) & Self::MASK])
    }

    /// Append as many of `values` as fit, returns how many were queued
    pub fn push_slice(&mut self, values: &[T]) -> usize {
        let count = values.len().min(self.available());
        let tail = (self.head + self.len) & Self::MASK;
        let first = count.min(N - tail);

        self.data[tail..tail + first].copy_from_slice(&values[..first]);
        self.data[..count - first].copy_from_slice(&values[first..count]);

        self.len += count;
        count
    }

    /// Append `count` copies of `value` (bounded by free space)
    pub fn push_repeat(&mut self, value: T, count: usize) -> usize {
        let count = count.min(self.available());
        for _ in 0..count {
            let tail = (self.head + self.len) & Self::MASK;
            self.data[tail] = value;
            self.len += 1;
        }
        count
    }

    /// Pop into `out` in FIFO order, returns how many were written
    pub fn pop_into(&mut self, out: &mut [T]) -> usize {
        let count = out.len().min(self.len);
        let first = count.min(N - self.head);

        out[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        out[first..count].copy_from_slice(&self.data[..count - first]);

        self.head = (self.head + count) & Self::MASK;
        self.len -= count;
        count
    }

    /// Drop all queued elements (storage is kept)
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Copy + Default, const N: usize> Default for StaticQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default + std::fmt::Debug, const N: usize> std::fmt::Debug for StaticQueue<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticQueue")
            .field("capacity", &N)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q: StaticQueue<i32, 8> = StaticQueue::new();
        for i in 0..5 {
            q.push(i).unwrap();
        }
        assert_eq!(q.len(), 5);
        for i in 0..5 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_beyond_capacity_is_rejected() {
        let mut q: StaticQueue<i32, 4> = StaticQueue::new();
        for i in 0..4 {
            assert!(q.push(i).is_ok());
        }
        assert!(q.is_full());
        assert_eq!(q.push(99), Err(99));

        // Remaining entries untouched
        let drained: Vec<i32> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_wraparound_interleaved() {
        let mut q: StaticQueue<u32, 4> = StaticQueue::new();
        let mut next_in = 0u32;
        let mut next_out = 0u32;

        for round in 0..50 {
            let pushes = 1 + round % 3;
            for _ in 0..pushes {
                if q.push(next_in).is_ok() {
                    next_in += 1;
                }
            }
            let pops = 1 + (round + 1) % 3;
            for _ in 0..pops {
                if let Some(v) = q.pop() {
                    assert_eq!(v, next_out);
                    next_out += 1;
                }
            }
        }
        assert_eq!(next_in - next_out, q.len() as u32);
    }

    #[test]
    fn test_slice_operations_wrap() {
        let mut q: StaticQueue<f64, 8> = StaticQueue::new();
        q.push_repeat(0.0, 6);
        let mut sink = [0.0; 6];
        assert_eq!(q.pop_into(&mut sink), 6);

        // head is now at 6, slice push must wrap
        assert_eq!(q.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]), 5);
        assert_eq!(q.get(0), Some(&1.0));
        assert_eq!(q.get(4), Some(&5.0));

        let mut out = [0.0; 8];
        assert_eq!(q.pop_into(&mut out), 5);
        assert_eq!(&out[..5], &[1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_push_slice_truncates_at_capacity() {
        let mut q: StaticQueue<i32, 4> = StaticQueue::new();
        q.push(7).unwrap();
        assert_eq!(q.push_slice(&[1, 2, 3, 4, 5]), 3);
        let mut out = [0; 4];
        assert_eq!(q.pop_into(&mut out), 4);
        assert_eq!(out, [7, 1, 2, 3]);
        assert_eq!(q.push_repeat(0, 10), 0);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut q: StaticQueue<i32, 16> = StaticQueue::new();
        q.push_repeat(1, 10);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 16);
        assert_eq!(q.available(), 16);
    }
}
