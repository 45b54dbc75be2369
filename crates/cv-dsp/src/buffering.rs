//! Host block ↔ internal block reconciliation
//!
//! Input is gathered into fixed blocks of `block_size`; each full block is
//! handed to the kernel and its output queued. The output queue starts with
//! `block_size` zeros, which is exactly the latency this adds and guarantees
//! the queue never runs dry whatever the host block size is.

use cv_core::{ConvError, ConvResult, MAX_PARTITION_SIZE, Sample, StaticQueue};

/// Output queue capacity: two blocks of the largest partition
pub const BLOCK_QUEUE_CAPACITY: usize = 2 * MAX_PARTITION_SIZE;

pub struct BlockBuffer {
    block_size: usize,
    /// Input block being filled
    input: Vec<Sample>,
    fill: usize,
    /// Kernel output for the last full block
    block_out: Vec<Sample>,
    output: StaticQueue<Sample, BLOCK_QUEUE_CAPACITY>,
}

impl BlockBuffer {
    pub fn new(block_size: usize) -> ConvResult<Self> {
        if block_size == 0 || block_size > MAX_PARTITION_SIZE {
            return Err(ConvError::InvalidBlockSize(block_size));
        }
        let mut buffer = Self {
            block_size,
            input: vec![0.0; block_size],
            fill: 0,
            block_out: vec![0.0; block_size],
            output: StaticQueue::new(),
        };
        buffer.reset();
        Ok(buffer)
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Delay added by the queue
    #[inline]
    pub fn latency(&self) -> usize {
        self.block_size
    }

    /// Stream `input` through `kernel` (called once per full block)
    pub fn process<F>(&mut self, input: &[Sample], output: &mut [Sample], mut kernel: F)
    where
        F: FnMut(&[Sample], &mut [Sample]),
    {
        let n = input.len().min(output.len());
        let mut done = 0;

        while done < n {
            let take = (self.block_size - self.fill).min(n - done);
            self.input[self.fill..self.fill + take].copy_from_slice(&input[done..done + take]);
            self.fill += take;

            if self.fill == self.block_size {
                kernel(&self.input, &mut self.block_out);
                self.output.push_slice(&self.block_out);
                self.fill = 0;
            }

            let chunk = &mut output[done..done + take];
            let popped = self.output.pop_into(chunk);
            chunk[popped..].fill(0.0);
            done += take;
        }
    }

    /// Clear pending input and restore the latency prefill
    pub fn reset(&mut self) {
        self.fill = 0;
        self.input.fill(0.0);
        self.output.clear();
        self.output.push_repeat(0.0, self.block_size);
    }
}
