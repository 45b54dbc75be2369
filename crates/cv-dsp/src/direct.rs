//! Direct time-domain convolution
//!
//! Each output sample is the dot product of the input history with the IR
//! taps. O(N) per sample, no added latency. Used for short IRs, as the
//! reference the partitioned engines are checked against, and for the FIR
//! part of the parallel filter bank.

use cv_core::{ConvError, ConvResult, ProcessSetup, Sample, StaticRingBuffer};

use crate::impulse::ImpulseResponse;
use crate::{ConvolutionEngine, MAX_ENGINE_CHANNELS, pass_through};

/// Longest IR the direct engine accepts
pub const DIRECT_MAX_TAPS: usize = 65_536;

/// FIR taps over a fixed-capacity history
pub struct DirectKernel<const N: usize> {
    taps: Vec<Sample>,
    history: StaticRingBuffer<Sample, N>,
}

impl<const N: usize> DirectKernel<N> {
    pub fn new(taps: &[Sample]) -> ConvResult<Self> {
        if taps.len() > N {
            return Err(ConvError::ImpulseTooLong {
                len: taps.len(),
                max: N,
            });
        }
        Ok(Self {
            taps: taps.to_vec(),
            history: StaticRingBuffer::new(taps.len())?,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    #[inline]
    pub fn tick(&mut self, input: Sample) -> Sample {
        self.history.push(input);
        self.history.dot(&self.taps)
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// Direct convolution engine
pub struct DirectConvolver {
    kernels: Vec<DirectKernel<DIRECT_MAX_TAPS>>,
    ir_len: usize,
    setup: Option<ProcessSetup>,
}

impl DirectConvolver {
    /// Build for `num_channels` host channels (a mono IR feeds all of them)
    pub fn new(ir: &ImpulseResponse, num_channels: usize) -> ConvResult<Self> {
        if num_channels == 0 || num_channels > MAX_ENGINE_CHANNELS {
            return Err(ConvError::UnsupportedChannels(num_channels));
        }
        let kernels = (0..num_channels)
            .map(|ch| DirectKernel::new(ir.channel(ch)))
            .collect::<ConvResult<Vec<_>>>()?;

        log::debug!(
            "Direct convolver: {} taps, {} channels",
            ir.len(),
            num_channels
        );

        Ok(Self {
            kernels,
            ir_len: ir.len(),
            setup: None,
        })
    }

    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    /// Setup recorded by the last successful `configure`
    pub fn setup(&self) -> Option<ProcessSetup> {
        self.setup
    }
}

impl ConvolutionEngine for DirectConvolver {
    fn configure(&mut self, max_block_size: usize, sample_rate: f64) -> ConvResult<()> {
        self.setup = Some(ProcessSetup::new(max_block_size, sample_rate)?);
        Ok(())
    }

    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        for (ch, (input, output)) in inputs.iter().zip(outputs.iter_mut()).enumerate() {
            match self.kernels.get_mut(ch) {
                Some(kernel) if !kernel.is_empty() => {
                    for (y, &x) in output.iter_mut().zip(input.iter()) {
                        *y = kernel.tick(x);
                    }
                }
                _ => pass_through(input, output),
            }
        }
    }

    fn latency(&self) -> usize {
        0
    }

    fn reset(&mut self) {
        for kernel in &mut self.kernels {
            kernel.reset();
        }
    }

    fn num_channels(&self) -> usize {
        self.kernels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_reproduces_ir() {
        let taps = vec![1.0, 0.5, 0.25, -0.125];
        let ir = ImpulseResponse::mono(taps.clone(), 48000.0).unwrap();
        let mut engine = DirectConvolver::new(&ir, 1).unwrap();
        engine.configure(8, 48000.0).unwrap();

        let mut input = vec![0.0; 8];
        input[0] = 1.0;
        let mut output = vec![0.0; 8];
        engine.process_mono(&input, &mut output);

        assert_eq!(&output[..4], &taps[..]);
        assert!(output[4..].iter().all(|&y| y == 0.0));
        assert_eq!(engine.latency(), 0);
    }

    #[test]
    fn test_state_carries_across_blocks() {
        let ir = ImpulseResponse::mono(vec![1.0, 1.0, 1.0], 48000.0).unwrap();
        let mut engine = DirectConvolver::new(&ir, 1).unwrap();

        let mut out = [0.0; 2];
        engine.process_mono(&[1.0, 0.0], &mut out);
        assert_eq!(out, [1.0, 1.0]);
        engine.process_mono(&[0.0, 0.0], &mut out);
        assert_eq!(out, [1.0, 0.0]);
    }

    #[test]
    fn test_stereo_ir_per_channel() {
        let ir = ImpulseResponse::stereo(vec![1.0], vec![-2.0], 48000.0).unwrap();
        let mut engine = DirectConvolver::new(&ir, 2).unwrap();

        let left_in = [1.0, 2.0];
        let right_in = [1.0, 2.0];
        let mut left = [0.0; 2];
        let mut right = [0.0; 2];
        engine.process(&[&left_in, &right_in], &mut [&mut left, &mut right]);

        assert_eq!(left, [1.0, 2.0]);
        assert_eq!(right, [-2.0, -4.0]);
    }

    #[test]
    fn test_zero_length_ir_passes_through() {
        let ir = ImpulseResponse::mono(Vec::new(), 48000.0).unwrap();
        let mut engine = DirectConvolver::new(&ir, 1).unwrap();
        let input = [0.3, -0.2, 0.1];
        let mut output = [0.0; 3];
        engine.process_mono(&input, &mut output);
        assert_eq!(output, input);
        assert_eq!(engine.latency(), 0);
    }

    #[test]
    fn test_too_many_taps_rejected() {
        let ir = ImpulseResponse::mono(vec![0.0; DIRECT_MAX_TAPS + 1], 48000.0).unwrap();
        assert!(matches!(
            DirectConvolver::new(&ir, 1),
            Err(ConvError::ImpulseTooLong { .. })
        ));
    }

    #[test]
    fn test_configure_rejects_invalid_setup() {
        let ir = ImpulseResponse::mono(vec![1.0], 48000.0).unwrap();
        let mut engine = DirectConvolver::new(&ir, 1).unwrap();
        assert!(engine.configure(0, 48000.0).is_err());
        assert!(engine.configure(64, 0.0).is_err());
    }
}
